pub mod logger;

pub use logger::{AsyncLogger, LogLevel, init_console_logger, init_file_logger};
