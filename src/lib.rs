pub mod api;
pub mod config;
pub mod errors;
pub mod generation;
pub mod logging;
pub mod orchestrator;
pub mod sandbox;
pub mod server;
pub mod task;
