//! policygate core: the contracts every gate is built from.
//!
//! This crate defines the request context, the policy verdict, the
//! namespaced store contract, the `Policy` trait and the chain evaluator
//! (`PolicyManager`). It carries no transport or process plumbing so the
//! same chain can be driven in-process or through the runner bridge.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `GateError`/`Result`; denials are
//! ordinary `PolicyResult` values, never errors.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod context;
pub mod error;
pub mod manager;
pub mod policy;
pub mod result;
pub mod store;

pub use context::RequestContext;
/// Shared result type.
pub use error::{ErrorType, GateError, Result};
pub use manager::{ManagerExport, PolicyManager};
pub use policy::{Phase, Policy, PolicyExport, SharedPolicy};
pub use result::PolicyResult;
pub use store::{MemoryStore, SharedStore, Store, StoreSlot};
