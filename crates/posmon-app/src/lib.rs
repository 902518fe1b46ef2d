//! Position monitor application.
//!
//! Wires one venue engine per configured venue, a unified hub over all of
//! them and the dashboard server, and runs until Ctrl-C or a fatal error.

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
