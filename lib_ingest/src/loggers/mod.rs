/// Console and rolling-file output for the `tracing` macros.
pub mod loggerlocal;

pub use loggerlocal::{build_filter, init_logging, DEFAULT_MAX_LOG_FILES};
