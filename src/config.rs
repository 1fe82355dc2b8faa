//! Typed process configuration, loaded once at startup via `clap`, the
//! way a process's arguments are parsed in `main`.

use clap::Parser;

/// Metadata catalog service configuration.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// Host to bind the HTTP server to.
    #[clap(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP server to.
    #[clap(long, env = "PORT", default_value = "5065")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[clap(long = "log-level", env = "LOGGING_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: "json" or "compact".
    #[clap(long = "log-format", env = "LOGGING_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Postgres connection URL. Takes precedence over the split
    /// `OPSDB_UTILITY_*` parts below when set.
    #[clap(long = "database-url", env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[clap(long, env = "OPSDB_UTILITY_USERNAME", default_value = "postgres")]
    pub opsdb_username: String,
    #[clap(long, env = "OPSDB_UTILITY_PASSWORD", default_value = "postgres")]
    pub opsdb_password: String,
    #[clap(long, env = "OPSDB_UTILITY_HOST", default_value = "db")]
    pub opsdb_host: String,
    #[clap(long, env = "OPSDB_UTILITY_PORT", default_value = "5432")]
    pub opsdb_port: u16,
    #[clap(long, env = "OPSDB_UTILITY_NAME", default_value = "metadata")]
    pub opsdb_name: String,

    /// URL of the event bus broker.
    #[clap(long = "bus-url", env = "KAFKA_URL", default_value = "kafka:29099")]
    pub bus_url: String,

    /// Topic to publish item change events to.
    #[clap(long = "bus-topic", env = "KAFKA_TOPIC", default_value = "metadata.items")]
    pub bus_topic: String,

    /// Base URL of the external permission-decision service.
    #[clap(long = "auth-service", env = "AUTH_HOST", default_value = "http://fakeauth")]
    pub auth_service_url: String,

    /// Base64-encoded RSA public key used to validate inbound access tokens.
    /// Decoding/validation of tokens happens upstream of this service.
    #[clap(long = "rsa-public-key", env = "RSA_PUBLIC_KEY", default_value = "")]
    pub rsa_public_key: String,

    #[clap(long, env = "GREENROOM_ZONE_VALUE", default_value = "0")]
    pub greenroom_zone_value: i32,
    #[clap(long, env = "CORE_ZONE_VALUE", default_value = "1")]
    pub core_zone_value: i32,

    #[clap(long, env = "MAX_TAGS", default_value = "10")]
    pub max_tags: usize,
    #[clap(long, env = "MAX_SYSTEM_TAGS", default_value = "10")]
    pub max_system_tags: usize,
    #[clap(long, env = "MAX_ATTRIBUTE_LENGTH", default_value = "100")]
    pub max_attribute_length: usize,
    #[clap(long, env = "MAX_COLLECTIONS", default_value = "10")]
    pub max_collections: i64,

    /// Origins to allow via CORS. May be specified multiple times.
    #[clap(long = "allow-origin")]
    pub allow_origin: Vec<String>,
}

impl Config {
    pub fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!(
                "postgresql://{}:{}@{}:{}/{}",
                self.opsdb_username, self.opsdb_password, self.opsdb_host, self.opsdb_port, self.opsdb_name,
            )
        })
    }

    pub fn limits(&self) -> crate::store::items::Limits {
        crate::store::items::Limits {
            max_tags: self.max_tags,
            max_system_tags: self.max_system_tags,
            max_attribute_length: self.max_attribute_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_falls_back_to_split_parts() {
        let cfg = Config::parse_from(["metadata-catalog"]);
        assert_eq!(cfg.database_url(), "postgresql://postgres:postgres@db:5432/metadata");
    }

    #[test]
    fn database_url_prefers_explicit_url() {
        let mut cfg = Config::parse_from(["metadata-catalog"]);
        cfg.database_url = Some("postgresql://x:y@z/db".to_string());
        assert_eq!(cfg.database_url(), "postgresql://x:y@z/db");
    }
}
