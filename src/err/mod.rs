
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Crate-wide shorthand.
pub type Result<T> = std::result::Result<T, Error>;
