//! Reusable action support.
//!
//! An action is a self-describing step implementation identified by a
//! reference (`owner/name@ref` or a local path) and backed by an
//! `action.yml` metadata file. [`reference`] parses references,
//! [`metadata`] models the metadata document, and [`resolver`]
//! materialises remote actions into the on-disk cache.

pub mod metadata;
pub mod reference;
pub mod resolver;

pub use metadata::{ActionInput, ActionMetadata, ActionOutput, ActionRuns, ActionRuntime};
pub use reference::ActionRef;
pub use resolver::{ActionResolver, ResolvedAction};
