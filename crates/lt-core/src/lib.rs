//! # lt-core
//!
//! Core types shared by the La Tanda Auth RS crates.
//!
//! - Request rejection codes ([`AuthErrorCode`])
//! - Configuration errors ([`ConfigError`])
//! - Settings loaded from the environment ([`config::AppConfig`])

pub mod config;
pub mod error;

pub use config::{AppConfig, AuthSettings, ServerSettings};
pub use error::*;
