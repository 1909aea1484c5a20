//! Top-level facade crate for policygate.
//!
//! Re-exports the core contracts and the engine so users can depend on a
//! single crate. `prelude` pulls in what a typical embedder needs to build
//! a chain by hand or from a policy-set file.

pub mod core {
    pub use policygate_core::*;
}

pub mod engine {
    pub use policygate_engine::*;
}

pub use policygate_core::{
    GateError, Policy, PolicyManager, PolicyResult, RequestContext, Result, SharedPolicy,
    SharedStore, Store,
};

pub mod prelude {
    pub use policygate_core::{
        MemoryStore, Phase, Policy, PolicyManager, PolicyResult, RequestContext, SharedPolicy,
        SharedStore, Store,
    };
    pub use policygate_engine::config::{load_from_file, load_from_str, PolicyConfig};
    pub use policygate_engine::factory::{FromConfig, PolicyFactory, PolicyRegistry};
    pub use policygate_engine::policies::{AllOf, AnyOf, CheckPhase, CustomPolicy, Not};
    pub use policygate_engine::runner::{Executor, RunnerInput, RunnerOutput};
    pub use policygate_engine::store::{open_store, FileStore, StoreConfig};
}
