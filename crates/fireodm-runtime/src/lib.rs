//! Runtime layer for fireodm.
//!
//! Ties the core schema, codec and validation layers to a storage driver:
//! the [`Odm`] entry point runs the write state machine around every save,
//! dispatches lifecycle hooks and populates relations on demand.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod filter;
pub mod hooks;
pub mod odm;
pub mod relation;

pub use config::Config;
pub use filter::Filter;
pub use hooks::{HookRegistry, Operation};
pub use odm::{Odm, OdmBuilder, Settings};
pub use relation::{Loader, OnMissing, PopulateOptions, RelationResolver};
