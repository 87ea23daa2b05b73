//! Handlers 模块

pub mod health;
pub mod metrics;
pub mod osmand;
pub mod sessions;

pub use health::*;
pub use metrics::*;
pub use osmand::*;
pub use sessions::*;
