//! Configuration layer for the curator media organizer.
//!
//! Settings live in an INI file with `PATHS`, `AI`, `TMDB`, `DATABASE` and
//! `SYSTEM` sections. A missing file is created with a commented default
//! template on first boot. Every option carries a typed default; an invalid
//! value falls back to its default with a warning rather than failing the
//! load. Validation of the handful of options that cannot be defaulted
//! (film-db API key, monitor directories, library root) is a separate step so
//! a hot reload can reject a bad edit while the prior snapshot stays live.

mod handle;
mod loader;
mod settings;

pub use handle::ConfigHandle;
pub use loader::{default_template, load_settings, validate, write_default_config};
pub use settings::{
    AiService, AiSettings, LinkMethod, ServiceEndpoint, Settings, WatchEvent, PLACEHOLDER_KEY_PREFIX,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
