mod config;
mod opts;

pub use config::{
    Config, DEFAULT_EVENT_CHANNEL_BUFFER_SIZE, DEFAULT_MAX_CONCURRENT_OPERATIONS, MonitorRule,
    Settings, load_config,
};
pub use opts::Opts;
