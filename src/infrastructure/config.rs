use config::{Config, ConfigError, Environment, File, Map};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "POSTROOM";

/// Upper bound for retention, in days (about a century).
pub const MAX_RETENTION_DAYS: i64 = 36_500;
/// Upper bound for every `*_secs` setting (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub main_port: u16,
    pub server_host: String,
    pub enable_cors_insecurely: bool,
    /// Directory holding `api/openapi.json`, when the route description is supplied on disk.
    pub app_root: PathBuf,

    pub db_max_connections: u32,
    pub db_connect_timeout_secs: u64,
    pub api_register_timeout_secs: u64,
    pub run_migrations: bool,

    // Background services
    pub mail_poll_interval_secs: u64,
    pub mail_batch_size: i64,
    pub mail_max_attempts: i32,
    pub archive_sweep_interval_secs: u64,
    pub archive_retention_days: i64,

    pub shutdown_grace_secs: u64,
}

impl AppConfig {
    /// Load from config files and the process environment (`POSTROOM_*`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Self::environment())
    }

    /// Same layering as [`AppConfig::from_env`], but environment values come
    /// from `vars` instead of the process. Keys keep their `POSTROOM_` prefix.
    pub fn from_env_map(vars: Map<String, String>) -> Result<Self, ConfigError> {
        Self::load(Self::environment().source(Some(vars)))
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load(env: Environment) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(env)
            .set_default("server_host", "0.0.0.0")?
            .set_default("enable_cors_insecurely", false)?
            .set_default("app_root", ".")?
            .set_default("db_max_connections", 5)?
            .set_default("db_connect_timeout_secs", 10)?
            .set_default("api_register_timeout_secs", 10)?
            .set_default("run_migrations", true)?
            .set_default("mail_poll_interval_secs", 30)?
            .set_default("mail_batch_size", 25)?
            .set_default("mail_max_attempts", 5)?
            .set_default("archive_sweep_interval_secs", 3600)?
            .set_default("archive_retention_days", 30)?
            .set_default("shutdown_grace_secs", 10)?
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Message("database_url must not be empty".to_string()));
        }
        if self.main_port == 0 {
            return Err(ConfigError::Message("main_port must be non-zero".to_string()));
        }
        if self.mail_poll_interval_secs == 0 || self.archive_sweep_interval_secs == 0 {
            return Err(ConfigError::Message(
                "background service intervals must be non-zero".to_string(),
            ));
        }
        if self.mail_batch_size < 1 {
            return Err(ConfigError::Message("mail_batch_size must be at least 1".to_string()));
        }
        if self.mail_max_attempts < 1 {
            return Err(ConfigError::Message("mail_max_attempts must be at least 1".to_string()));
        }
        if !(0..=MAX_RETENTION_DAYS).contains(&self.archive_retention_days) {
            return Err(ConfigError::Message(format!(
                "archive_retention_days must be between 0 and {MAX_RETENTION_DAYS}"
            )));
        }

        let durations = [
            ("db_connect_timeout_secs", self.db_connect_timeout_secs),
            ("api_register_timeout_secs", self.api_register_timeout_secs),
            ("mail_poll_interval_secs", self.mail_poll_interval_secs),
            ("archive_sweep_interval_secs", self.archive_sweep_interval_secs),
            ("shutdown_grace_secs", self.shutdown_grace_secs),
        ];
        if let Some((key, _)) = durations.iter().find(|(_, secs)| *secs > MAX_DURATION_SECS) {
            return Err(ConfigError::Message(format!(
                "{key} must be at most {MAX_DURATION_SECS}"
            )));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server_host, self.main_port)
            .parse()
            .map_err(|e| ConfigError::Message(format!("invalid listen address: {e}")))
    }

    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.db_connect_timeout_secs)
    }

    pub fn api_register_timeout(&self) -> Duration {
        Duration::from_secs(self.api_register_timeout_secs)
    }

    pub fn mail_poll_interval(&self) -> Duration {
        Duration::from_secs(self.mail_poll_interval_secs)
    }

    pub fn archive_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.archive_sweep_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn loads_required_fields_and_fills_defaults() {
        let cfg = AppConfig::from_env_map(vars(&[
            ("POSTROOM_DATABASE_URL", "postgres://localhost/postroom"),
            ("POSTROOM_MAIN_PORT", "4000"),
        ]))
        .unwrap();

        assert_eq!(cfg.main_port, 4000);
        assert_eq!(cfg.server_host, "0.0.0.0");
        assert!(!cfg.enable_cors_insecurely);
        assert_eq!(cfg.app_root, PathBuf::from("."));
        assert_eq!(cfg.db_connect_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.listen_addr().unwrap().port(), 4000);
    }

    #[test]
    fn cors_flag_is_read_from_environment() {
        let cfg = AppConfig::from_env_map(vars(&[
            ("POSTROOM_DATABASE_URL", "postgres://localhost/postroom"),
            ("POSTROOM_MAIN_PORT", "4000"),
            ("POSTROOM_ENABLE_CORS_INSECURELY", "true"),
        ]))
        .unwrap();
        assert!(cfg.enable_cors_insecurely);
    }

    #[test]
    fn missing_port_is_fatal() {
        let err = AppConfig::from_env_map(vars(&[(
            "POSTROOM_DATABASE_URL",
            "postgres://localhost/postroom",
        )]));
        assert!(err.is_err());
    }

    #[test]
    fn missing_database_url_is_fatal() {
        let err = AppConfig::from_env_map(vars(&[("POSTROOM_MAIN_PORT", "4000")]));
        assert!(err.is_err());
    }

    #[test]
    fn zero_port_is_rejected() {
        let err = AppConfig::from_env_map(vars(&[
            ("POSTROOM_DATABASE_URL", "postgres://localhost/postroom"),
            ("POSTROOM_MAIN_PORT", "0"),
        ]));
        assert!(matches!(err, Err(ConfigError::Message(_))));
    }

    #[test]
    fn retention_is_bounded() {
        let base = [
            ("POSTROOM_DATABASE_URL", "postgres://localhost/postroom"),
            ("POSTROOM_MAIN_PORT", "4000"),
        ];

        let mut pairs = base.to_vec();
        pairs.push(("POSTROOM_ARCHIVE_RETENTION_DAYS", "1000000000"));
        assert!(matches!(
            AppConfig::from_env_map(vars(&pairs)),
            Err(ConfigError::Message(_))
        ));

        let mut pairs = base.to_vec();
        pairs.push(("POSTROOM_ARCHIVE_RETENTION_DAYS", "36500"));
        assert!(AppConfig::from_env_map(vars(&pairs)).is_ok());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let err = AppConfig::from_env_map(vars(&[
            ("POSTROOM_DATABASE_URL", "postgres://localhost/postroom"),
            ("POSTROOM_MAIN_PORT", "4000"),
            ("POSTROOM_SHUTDOWN_GRACE_SECS", "999999999999"),
        ]));
        match err {
            Err(ConfigError::Message(message)) => assert!(message.contains("shutdown_grace_secs")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
