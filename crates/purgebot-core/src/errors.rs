use std::time::Duration;

/// Malformed user-supplied field.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("bad format")]
    BadFormat,

    #[error("must be negative")]
    NotNegative,

    #[error("must be positive")]
    NotPositive,
}

/// Core error type.
///
/// Adapter crates map their library errors into this type so flows can turn
/// any failure into exactly one user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("channel access error: {0}")]
    ChannelAccess(String),

    #[error("permission error: {0}")]
    Permission(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// The single message shown to the requester when a flow ends with this error.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(e) => format!("❌ Invalid input: {e}. Start over with /start."),
            Error::Authentication(e) => {
                format!("❌ Authentication failed: {e}. Start over with /start.")
            }
            Error::ChannelAccess(e) => format!("❌ Cannot access channel: {e}"),
            Error::Permission(e) => format!("❌ Permission denied: {e}"),
            Error::Unsupported(e) => format!("❌ Not supported: {e}"),
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::External(_) => {
                "❌ Something went wrong. Please try again later.".to_string()
            }
        }
    }
}

/// Failure of a single delete request. Only the deleter sees these.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeleteError {
    /// Server-mandated wait before the same request may be retried.
    #[error("flood wait of {}s", .0.as_secs())]
    FloodWait(Duration),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
