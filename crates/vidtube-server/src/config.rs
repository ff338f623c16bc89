use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::Duration;

/// Secrets that ship in examples and MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub access_token_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_secret: String,
    pub refresh_token_ttl: Duration,
    pub upload_tmp_dir: PathBuf,
    /// Remote media service; local storage under `media_dir` when unset.
    pub media_upload_url: Option<String>,
    pub media_timeout: std::time::Duration,
    pub media_dir: PathBuf,
    pub media_public_url: String,
    pub cors_origin: Option<String>,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env::var("VIDTUBE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env::var("VIDTUBE_PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()?;

        let access_token_secret = required_secret("VIDTUBE_ACCESS_TOKEN_SECRET")?;
        let refresh_token_secret = required_secret("VIDTUBE_REFRESH_TOKEN_SECRET")?;
        if access_token_secret == refresh_token_secret {
            bail!("VIDTUBE_ACCESS_TOKEN_SECRET and VIDTUBE_REFRESH_TOKEN_SECRET must differ");
        }

        Ok(Self {
            addr: format!("{}:{}", host, port).parse()?,
            db_path: env::var("VIDTUBE_DB_PATH")
                .unwrap_or_else(|_| "vidtube.db".into())
                .into(),
            access_token_secret,
            access_token_ttl: Duration::seconds(positive_secs(
                "VIDTUBE_ACCESS_TOKEN_TTL_SECS",
                900,
            )?),
            refresh_token_secret,
            refresh_token_ttl: Duration::seconds(positive_secs(
                "VIDTUBE_REFRESH_TOKEN_TTL_SECS",
                864_000,
            )?),
            upload_tmp_dir: env::var("VIDTUBE_UPLOAD_TMP_DIR")
                .unwrap_or_else(|_| "./public/temp".into())
                .into(),
            media_upload_url: env::var("VIDTUBE_MEDIA_UPLOAD_URL").ok().filter(|v| !v.is_empty()),
            media_timeout: std::time::Duration::from_secs(
                positive_secs("VIDTUBE_MEDIA_TIMEOUT_SECS", 30)?.unsigned_abs(),
            ),
            media_dir: env::var("VIDTUBE_MEDIA_DIR")
                .unwrap_or_else(|_| "./media".into())
                .into(),
            media_public_url: env::var("VIDTUBE_MEDIA_PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}/media", port)),
            cors_origin: env::var("VIDTUBE_CORS_ORIGIN").ok().filter(|v| !v.is_empty()),
            secure_cookies: env::var("VIDTUBE_SECURE_COOKIES")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        })
    }
}

fn required_secret(name: &str) -> Result<String> {
    let secret = env::var(name).unwrap_or_default();
    if secret.is_empty() || PLACEHOLDER_SECRETS.contains(&secret.as_str()) {
        bail!("{} is unset or still a placeholder; set it in your .env file", name);
    }
    Ok(secret)
}

fn positive_secs(name: &str, default: i64) -> Result<i64> {
    let secs = match env::var(name) {
        Ok(v) => v.parse()?,
        Err(_) => default,
    };
    if secs <= 0 {
        bail!("{} must be a positive number of seconds", name);
    }
    Ok(secs)
}
