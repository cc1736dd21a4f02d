//! GPS position fusion: accuracy gating, drift rejection, moving-average
//! smoothing, Kalman estimation and dead reckoning between fixes, with the
//! device compass as a side input.

pub mod config;
pub mod dead_reckoning;
pub mod drift;
pub mod error;
pub mod filters;
pub mod geodesy;
pub mod ingest;
pub mod live_status;
pub mod orientation;
pub mod position_fusion;
pub mod session;
pub mod sink;
pub mod smoothing;
pub mod sources;
pub mod status;
pub mod types;

pub use config::{EstimatorKind, FusionConfig};
pub use error::{Result, TrackingError};
pub use position_fusion::{FilterState, FusionEvent, FusionStats, PositionFusionPipeline};
pub use session::{SessionOptions, SessionState, TrackingSession};
pub use sink::{ChannelSubscriber, PositionSubscriber, SubscriptionId};
pub use types::{FusedPosition, OrientationSample, PositionOutput, RawFix};
