pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

pub use config::{AppConfig, EmptyGroupPolicy, SegmentationConfig};
pub use error::{SegmentError, SegmentResult};
pub use types::{ApiResponse, FilterResult};
