//! policygate engine library entry.
//!
//! This crate wires the durable store, the built-in policies, the composite
//! combinators, the config-driven factory and the runner bridge into a
//! cohesive enforcement stack. It is intended to be consumed by the binary
//! (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod config;
pub mod factory;
pub mod policies;
pub mod runner;
pub mod store;
