pub mod models;
pub mod service;

pub use service::{AppState, create_app};
