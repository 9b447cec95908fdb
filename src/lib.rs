//! Multi-reciprocity swap marketplace matching and settlement engine.
//!
//! [`engine::Engine`] is the single entry point: it owns the snapshot, the
//! key rings, and the operation manifest, and every public operation in
//! the marketplace goes through one of its methods.

pub mod authz;
pub mod commit;
pub mod config;
pub mod crypto;
pub mod delivery;
pub mod engine;
pub mod errors;
pub mod idempotency;
pub mod matching;
pub mod model;
pub mod policy;
pub mod settlement;
pub mod store;
pub mod tenancy;
pub mod vault;

pub use config::EngineConfig;
pub use engine::{Engine, OperationResponse, RequestContext};
pub use errors::{EngineError, EngineResult};
