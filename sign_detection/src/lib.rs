pub mod annotate;
pub mod app;
pub mod config;
pub mod detection;
pub mod inference_service;
pub mod labels;
pub mod model_service;
pub mod ort_service;
pub mod routes;
pub mod server;
pub mod storage;
pub mod telemetry;

pub use app::start_app;
