//! Global subscriber installation. Runs in its own binary so no other test owns
//! the global dispatcher.

use liquid_handler::config::LoggingConfig;
use liquid_handler::logging::{init, LoggingError};

#[test]
fn test_second_init_is_an_error() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        json: true,
    };
    init(&config).unwrap();
    tracing::info!(answer = 42, "json logging active");

    assert!(matches!(
        init(&config),
        Err(LoggingError::AlreadyInitialized(_))
    ));
}
