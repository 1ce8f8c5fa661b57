pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod languages;
pub mod redis;
pub mod store;
pub mod telemetry;
pub mod types;

pub use error::{CapsuleError, Result};
