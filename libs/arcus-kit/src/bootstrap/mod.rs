//! Process bootstrap: layered app configuration, logging and OS signal handling.

pub mod app_config;
pub mod logging;
pub mod signals;

pub use app_config::{
    AppConfig, ConfigSource, Credentials, LogFormat, LoggingConfig, TransportConfig, WebConfig,
};
pub use logging::init_logging;
pub use signals::{spawn_signal_listener, wait_for_shutdown};
