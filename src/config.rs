use serde::Deserialize;

use crate::middleware::rate_limit::parse_window;

const PLACEHOLDER_JWT_SECRET: &str = "CHANGE_ME_JWT_SECRET";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    /// Lifetime of issued session tokens. Set via ALUPASS_TOKEN_TTL_SECS. Default: 3600.
    pub token_ttl_secs: u64,
    pub slack_webhook_url: Option<String>,
    /// Comma-separated list of webhook URLs to notify on approval events.
    pub webhook_urls: Vec<String>,
    /// HMAC key for the `x-alupass-signature` webhook header.
    pub webhook_secret: Option<String>,
    /// Per-caller rate limit (requests per window). 0 = disabled.
    /// Set via ALUPASS_DEFAULT_RPM env var. Default: 600.
    pub default_rate_limit: u64,
    /// Window in seconds for the default rate limit. Accepts "60", "1m", "1h".
    /// Set via ALUPASS_DEFAULT_RPM_WINDOW env var. Default: 60.
    pub default_rate_limit_window: u64,
    /// Interval of the expiry sweep. 0 disables the job.
    pub expiry_sweep_secs: u64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let jwt_secret =
        std::env::var("ALUPASS_JWT_SECRET").unwrap_or_else(|_| PLACEHOLDER_JWT_SECRET.into());

    if jwt_secret == PLACEHOLDER_JWT_SECRET {
        if is_production() {
            anyhow::bail!(
                "ALUPASS_JWT_SECRET is still the insecure placeholder. \
                 Set a long random secret before running in production."
            );
        }
        eprintln!("⚠️  ALUPASS_JWT_SECRET is not set, using insecure placeholder. Set a long random secret for production.");
    }

    let webhook_urls = parse_url_list(&std::env::var("ALUPASS_WEBHOOK_URLS").unwrap_or_default())?;

    Ok(Config {
        port: std::env::var("ALUPASS_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/alupass".into()),
        jwt_secret,
        token_ttl_secs: std::env::var("ALUPASS_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600),
        slack_webhook_url: std::env::var("ALUPASS_SLACK_WEBHOOK_URL")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        webhook_urls,
        webhook_secret: std::env::var("ALUPASS_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty()),
        default_rate_limit: std::env::var("ALUPASS_DEFAULT_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600),
        default_rate_limit_window: std::env::var("ALUPASS_DEFAULT_RPM_WINDOW")
            .map(|v| parse_window(&v))
            .unwrap_or(60),
        expiry_sweep_secs: std::env::var("ALUPASS_EXPIRY_SWEEP_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600),
    })
}

fn is_production() -> bool {
    std::env::var("ALUPASS_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .map(|v| v == "production")
        .unwrap_or(false)
}

/// Split a comma-separated list, rejecting anything that is not an
/// http(s) URL.
pub fn parse_url_list(raw: &str) -> anyhow::Result<Vec<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let parsed = url::Url::parse(s)
                .map_err(|e| anyhow::anyhow!("invalid webhook URL '{}': {}", s, e))?;
            match parsed.scheme() {
                "http" | "https" => Ok(s.to_string()),
                other => anyhow::bail!("webhook URL '{}' has unsupported scheme '{}'", s, other),
            }
        })
        .collect()
}
