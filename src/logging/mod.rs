pub mod config;
pub mod logger;

pub use config::{LogLevel, LoggingConfig};
pub use logger::init_logging;
