use dotenv::dotenv;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_pool_size")]
    pub database_pool_size: u32,
    pub jwt_secret: String,
    /// Signs the links mailed for email confirmation and password reset.
    pub secret_key: String,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_minutes: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_days: i64,
    #[serde(default = "default_email_ttl")]
    pub email_token_ttl_seconds: i64,
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    #[serde(default = "default_mail_server")]
    pub mail_server: String,
    #[serde(default = "default_mail_port")]
    pub mail_port: u16,
    pub mail_username: Option<String>,
    pub mail_password: Option<String>,
    pub cloudinary_cloud_name: Option<String>,
    pub cloudinary_api_key: Option<String>,
    pub cloudinary_api_secret: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_pool_size() -> u32 {
    10
}

fn default_access_ttl() -> i64 {
    60
}

fn default_refresh_ttl() -> i64 {
    30
}

fn default_email_ttl() -> i64 {
    3600
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_mail_server() -> String {
    "smtp.gmail.com".to_string()
}

fn default_mail_port() -> u16 {
    587
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv().ok(); // Load .env file if present
        Self::build(config::Environment::default().try_parsing(true))
    }

    /// Builds the configuration from an explicit key/value map instead of the process
    /// environment. Keys use the same upper-case names as the environment variables.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self, config::ConfigError> {
        Self::build(
            config::Environment::default()
                .try_parsing(true)
                .source(Some(vars)),
        )
    }

    fn build(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn mail_credentials(&self) -> Option<(&str, &str)> {
        match (&self.mail_username, &self.mail_password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user.as_str(), pass.as_str()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    let vars = [
        ("DATABASE_URL", "postgres://localhost/rental_marketplace_test"),
        ("JWT_SECRET", "test-jwt-secret"),
        ("SECRET_KEY", "test-secret-key"),
        ("FRONTEND_URL", "http://frontend.test"),
    ];
    AppConfig::from_map(
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
    .expect("test config")
}
