use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing key in table.
    #[error("missing key: {0}")]
    MissingKey(String),

    /// Tried to traverse into a primitive.
    #[error("can't traverse into non-table key: {0}")]
    TraverseNonTableAt(String),

    /// Invalid override string.
    #[error("invalid override: '{0}'")]
    InvalidOverride(String),

    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config root is not a table")]
    NotATable,
}
