//! Engine configuration.
//!
//! Layered, later sources win:
//! 1. Defaults in code
//! 2. `config/{environment}.toml` (optional)
//! 3. `STOCKLEDGER__*` environment variables, e.g. `STOCKLEDGER__DATABASE__URL`
//!
//! The environment name comes from `STOCKLEDGER_ENVIRONMENT` (default
//! `development`). A `.env` file is loaded first when present.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use stockledger_accounting::PaymentTerms;
use stockledger_sales::ReservationPolicy;

use crate::receiving::ReceivingPolicy;
use crate::workers::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub environment: String,
    pub database: DatabaseConfig,
    pub reservations: ReservationPolicy,
    pub payables: PaymentTerms,
    pub receiving: ReceivingPolicy,
    pub worker_retry: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of pooled connections
    pub max_connections: u32,
}

impl LedgerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let environment =
            std::env::var("STOCKLEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let builder = defaults(&environment)?
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("STOCKLEDGER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("receiving.preferred_warehouse_keywords"),
            );
        Self::from_builder(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }
}

/// Builder preloaded with every default, ready for more sources.
pub fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let reservations = ReservationPolicy::default();
    let receiving = ReceivingPolicy::default();
    let retry = RetryPolicy::default();

    config::Config::builder()
        .set_default("environment", environment)?
        .set_default("database.url", "postgres://localhost:5432/stockledger")?
        .set_default("database.max_connections", 10)?
        .set_default("reservations.hold_hours", reservations.hold_hours)?
        .set_default(
            "reservations.approval_extension_hours",
            reservations.approval_extension_hours,
        )?
        .set_default("payables.due_in_days", PaymentTerms::default().due_in_days)?
        .set_default(
            "receiving.preferred_warehouse_keywords",
            receiving.preferred_warehouse_keywords,
        )?
        .set_default("worker_retry.max_retries", retry.max_retries)?
        .set_default("worker_retry.initial_backoff_ms", retry.initial_backoff_ms)?
        .set_default("worker_retry.max_backoff_ms", retry.max_backoff_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults_cover_every_policy() {
        let cfg = LedgerConfig::from_builder(defaults("test").unwrap()).unwrap();
        assert_eq!(cfg.environment, "test");
        assert_eq!(cfg.database.max_connections, 10);
        assert_eq!(cfg.reservations, ReservationPolicy::default());
        assert_eq!(cfg.payables, PaymentTerms::default());
        assert_eq!(cfg.receiving, ReceivingPolicy::default());
        assert_eq!(cfg.worker_retry, RetryPolicy::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            [database]
            url = "postgres://db.internal/stock"

            [payables]
            due_in_days = 45

            [receiving]
            preferred_warehouse_keywords = ["central"]

            [worker_retry]
            max_retries = 5
        "#;
        let builder = defaults("production")
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml));
        let cfg = LedgerConfig::from_builder(builder).unwrap();

        assert_eq!(cfg.database.url, "postgres://db.internal/stock");
        assert_eq!(cfg.payables.due_in_days, 45);
        assert_eq!(cfg.receiving.preferred_warehouse_keywords, vec!["central"]);
        assert_eq!(cfg.reservations.hold_hours, 24);
        assert_eq!(cfg.worker_retry.max_retries, 5);
        assert_eq!(cfg.worker_retry.initial_backoff_ms, 100);
    }
}
