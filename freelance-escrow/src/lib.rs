//! Escrow backend for paid freelance work
//!
//! One escrow instance holds one job between a payer and a worker:
//! - a five-state lifecycle (Created, Funded, Submitted, Completed, Canceled)
//! - role-based authorization per method
//! - exact-amount funding into a custodial account
//! - atomic settlement that pays the worker and hands over a unique
//!   proof-of-work certificate in a single ledger bundle

pub mod authorization;
pub mod config;
pub mod error;
pub mod job_manager;
pub mod job_store;
pub mod ledger;
pub mod models;
pub mod node;
pub mod settlement;
pub mod state_machine;
pub mod validation;

pub use error::EscrowError;
pub use node::EscrowNode;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
