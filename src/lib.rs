pub mod config;
pub mod dispatch;
pub mod errors;
pub mod telemetry;
