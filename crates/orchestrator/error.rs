use ferry_config::ConfigError;
use ferry_remote::RemoteError;
use thiserror::Error;

/// Errors that abort a whole run. Everything that goes wrong for individual records is
/// recorded on their `RecordState` instead.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Source query failed: {0}")]
    SourceQuery(#[source] RemoteError),
    #[error("Failed to read source records: {0}")]
    SourceRead(#[source] RemoteError),
    #[error("Failed to build content pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
