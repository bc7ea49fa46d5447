//! # Application State Management
//!
//! Shared state handed to every request handler.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pypi_server::{AppState, Config};
//!
//! let state = Arc::new(AppState::new(Config::default()));
//! let router = pypi_server::build_router(state);
//! ```

use crate::catalog::Catalog;
use crate::config::Config;
use std::sync::Arc;

/// Configuration and the package catalog, shared across handlers via `Arc`.
///
/// The catalog is the only mutable resource; it synchronizes internally, so the
/// state itself needs no lock.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<Catalog>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let catalog = Catalog::from_config(&config);
        AppState {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
        }
    }
}
