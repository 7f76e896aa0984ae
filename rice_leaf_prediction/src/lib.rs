mod ort_service;
mod routes;
mod server;
mod telemetry;

pub mod catalog;
pub mod classifier;
pub mod config;
pub mod gate;
pub mod labels;
pub mod model_service;
pub mod pipeline;

pub use server::start_server;
