//! Tracing setup for binaries and tests embedding the lending core

use crate::config::Config;

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `config.log_level`. Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: &Config) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            environment = config.environment.as_str(),
            database = config.database_url_masked().as_deref().unwrap_or("in-memory"),
            "Tracing initialized"
        );
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use rust_decimal_macros::dec;

    #[test]
    fn test_second_init_is_rejected() {
        let config = Config {
            environment: Environment::Development,
            database_url: None,
            db_max_connections: 1,
            log_level: "debug".to_string(),
            min_loan_amount: dec!(100),
            max_loan_amount: dec!(50000),
            max_term_days: 365,
            max_term_months: 60,
            external_call_timeout_ms: 5000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 10,
            payment_api_url: None,
            payment_api_key: None,
            payment_currency: "usd".to_string(),
            notify_webhook_url: None,
        };

        init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
