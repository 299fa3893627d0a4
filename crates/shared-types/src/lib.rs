//! # Shared Types Crate
//!
//! Entities, domain events, the error taxonomy and the cancellation
//! context shared by every repository-core crate.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: all cross-crate types are defined here.
//! - **Closed entity set**: `EntityRef` is a sealed union; predicates match
//!   on it exhaustively.
//! - **User scope is explicit**: every entity carries its `UserId`.

pub mod context;
pub mod entities;
pub mod errors;
pub mod events;
pub mod patch;

pub use context::{CancelHandle, Context, ContextError};
pub use entities::*;
pub use errors::*;
pub use events::{DomainEvent, DomainEventKind};
pub use patch::{NodePatch, Patch};
