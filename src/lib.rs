//! Vermont - a local workflow runner.
//!
//! Vermont executes CI-style workflow files on the local machine by
//! driving a container engine CLI: it parses the declarative pipeline
//! document, expands matrix jobs, schedules the job graph in parallel,
//! and runs each step inside a container.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface
//! - [`config`] - Runner configuration
//! - [`workflow`] - Workflow model, parser, and matrix expansion
//! - [`expr`] - `${{ … }}` expression substitution
//! - [`actions`] - Action references, metadata, resolution, and caching
//! - [`container`] - Container engine CLI driver
//! - [`engine`] - Job scheduling and step execution
//! - [`error`] - Error types and result alias
//!
//! # Example
//!
//! ```no_run
//! use vermont::config::Config;
//! use vermont::engine::Engine;
//!
//! let engine = Engine::new(Config::default());
//! let summary = engine.run(std::path::Path::new(".github/workflows/ci.yml")).unwrap();
//! assert!(summary.success);
//! ```

pub mod actions;
pub mod cli;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod expr;
pub mod workflow;

pub use error::{Result, VermontError};
