use anyhow::{Context, Result};

/// Secrets and environment-specific values. Everything else (sources,
/// stepping, recrawl policy) lives in the TOML `FileConfig`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub etherscan_api_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            etherscan_api_key: std::env::var("ETHERSCAN_API_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => preview(v),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", preview(&self.database_url));
        tracing::info!("  ETHERSCAN_API_KEY: {}", preview_opt(&self.etherscan_api_key));
    }
}

/// Redacted form of a secret: its first five characters and its length.
fn preview(val: &str) -> String {
    let head: String = val.chars().take(5).collect();
    format!("{}...({} chars)", head, val.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_shows_prefix_and_length() {
        assert_eq!(preview("postgres://user:pw@db/app"), "postg...(25 chars)");
        assert_eq!(preview("abc"), "abc...(3 chars)");
    }

    #[test]
    fn preview_handles_multibyte_secrets() {
        assert_eq!(preview("ключ-секрет"), "ключ-...(11 chars)");
        assert_eq!(preview("🔑🔑🔑🔑🔑🔑"), "🔑🔑🔑🔑🔑...(6 chars)");
    }
}
