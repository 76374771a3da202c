use chrono::Duration;
use secrecy::Secret;
use serde::Deserialize;

pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 7;
pub const MAX_TOKEN_TTL_DAYS: i64 = 3650;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Postgres connection string. When absent the server keeps state in memory.
    pub database_url: Option<String>,
    pub base_url: String,
    pub host: String,
    pub port: u16,

    // Email
    pub sender_address: String,
    pub admin_recipient: String,
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<Secret<String>>,

    // Approval links
    pub token_ttl_days: i64,

    // Deep link to the record in the admin console, `{request_id}` is substituted
    pub admin_console_url: Option<String>,
}

/// Settings the certification workflow needs at runtime.
///
/// Built once from [`Config`] and handed to the services, so nothing in the
/// workflow reads process-wide state.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub sender_address: String,
    pub admin_recipient: String,
    pub token_ttl: Duration,
    pub public_base_url: String,
    pub admin_console_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let token_ttl_days = token_ttl_days(&config)?;

        Ok(Self {
            database_url: config.get("database_url").ok(),
            base_url: config.get("base_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            sender_address: config.get("sender_address")?,
            admin_recipient: config.get("admin_recipient")?,
            mail_api_url: config.get("mail_api_url").ok(),
            mail_api_key: config.get::<String>("mail_api_key").ok().map(Secret::new),

            token_ttl_days,

            admin_console_url: config.get("admin_console_url").ok(),
        })
    }

    pub fn workflow(&self) -> WorkflowConfig {
        WorkflowConfig {
            sender_address: self.sender_address.clone(),
            admin_recipient: self.admin_recipient.clone(),
            token_ttl: Duration::days(self.token_ttl_days),
            public_base_url: self.base_url.clone(),
            admin_console_url: self.admin_console_url.clone(),
        }
    }
}

/// `TOKEN_TTL_DAYS`, defaulting when unset. Malformed or out-of-range values are errors.
fn token_ttl_days(config: &config::Config) -> Result<i64, config::ConfigError> {
    let days = match config.get::<i64>("token_ttl_days") {
        Ok(days) => days,
        Err(config::ConfigError::NotFound(_)) => DEFAULT_TOKEN_TTL_DAYS,
        Err(e) => return Err(e),
    };

    if !(1..=MAX_TOKEN_TTL_DAYS).contains(&days) {
        return Err(config::ConfigError::Message(format!(
            "TOKEN_TTL_DAYS must be between 1 and {}, got {}",
            MAX_TOKEN_TTL_DAYS, days
        )));
    }

    Ok(days)
}

impl WorkflowConfig {
    pub fn token_ttl_days(&self) -> i64 {
        self.token_ttl.num_days()
    }

    pub fn admin_console_link(&self, request_id: &str) -> Option<String> {
        self.admin_console_url
            .as_ref()
            .map(|template| template.replace("{request_id}", request_id))
    }
}

#[cfg(test)]
impl WorkflowConfig {
    pub fn for_tests() -> Self {
        Self {
            sender_address: "noreply@example.com".to_string(),
            admin_recipient: "admin@example.com".to_string(),
            token_ttl: Duration::days(DEFAULT_TOKEN_TTL_DAYS),
            public_base_url: "https://certs.example.com".to_string(),
            admin_console_url: Some(
                "https://console.example.com/requests/{request_id}".to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_console_link_substitutes_request_id() {
        let config = WorkflowConfig::for_tests();
        assert_eq!(
            config.admin_console_link("abc").as_deref(),
            Some("https://console.example.com/requests/abc")
        );
    }

    #[test]
    fn test_default_ttl_is_seven_days() {
        assert_eq!(WorkflowConfig::for_tests().token_ttl_days(), 7);
    }

    fn ttl_source(value: Option<&str>) -> config::Config {
        let builder = config::Config::builder();
        let builder = match value {
            Some(value) => builder.set_override("token_ttl_days", value).unwrap(),
            None => builder,
        };
        builder.build().unwrap()
    }

    #[test]
    fn test_token_ttl_days_defaults_when_unset() {
        assert_eq!(token_ttl_days(&ttl_source(None)).unwrap(), DEFAULT_TOKEN_TTL_DAYS);
        assert_eq!(token_ttl_days(&ttl_source(Some("14"))).unwrap(), 14);
    }

    #[test]
    fn test_malformed_token_ttl_days_is_an_error() {
        assert!(token_ttl_days(&ttl_source(Some("seven"))).is_err());
    }

    #[test]
    fn test_token_ttl_days_must_be_in_range() {
        assert!(token_ttl_days(&ttl_source(Some("0"))).is_err());
        assert!(token_ttl_days(&ttl_source(Some("-3"))).is_err());
        assert!(token_ttl_days(&ttl_source(Some("3651"))).is_err());
        assert!(token_ttl_days(&ttl_source(Some("100000000"))).is_err());
        assert_eq!(
            token_ttl_days(&ttl_source(Some("3650"))).unwrap(),
            MAX_TOKEN_TTL_DAYS
        );
    }
}
