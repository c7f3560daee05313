pub mod config_base;
pub mod errors;
pub mod structured_logging;

pub use config_base::{BatchConfigBase, CircuitBreakerConfigBase, EnvSource, RetryConfigBase};
pub use errors::{ConfigError, ConfigResult};
pub use structured_logging::{
    init_structured_logging, JsonFormatter, LoggingConfig, OperationTimer, StructuredLogEntry,
};
