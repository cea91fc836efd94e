//! Configuration file parsing for nhlink
//!
//! Supports `.nhlink/config.toml` in the workspace root.

pub mod settings;
pub mod types;

pub use settings::{init_config_dir, load_settings, CONFIG_DIR};
pub use types::*;
