use thiserror::Error;

/// Failures surfaced by the tracking layer.
///
/// Per-sample rejections (poor accuracy, drift, singular updates) are not
/// errors; they come back as [`crate::position_fusion::FusionEvent`]s.
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Location watch not supported: {0}")]
    Unsupported(String),

    #[error("Tracking already running")]
    AlreadyTracking,

    #[error("Tracking not running")]
    NotTracking,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrackingError>;
