pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod language;
pub mod sandbox;
pub mod shutdown;
pub mod telemetry;
pub mod worker;
