//! Runner configuration.
//!
//! The engine consumes an immutable, typed configuration record. Unlike
//! the usual pattern of exporting configured variables into the process
//! environment, the `env` overlay here is expanded once and threaded
//! through the engine explicitly, which keeps runs (and tests) hermetic.

pub mod loader;
pub mod schema;

pub use loader::load_config;
pub use schema::{
    ActionsConfig, Config, ContainerConfig, LoggingConfig, RunnerConfig, StorageConfig,
};
