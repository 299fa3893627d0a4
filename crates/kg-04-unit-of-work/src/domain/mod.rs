//! Domain Layer - multi-step transactions
//!
//! - `transaction`: ordered steps with reverse-order rollback
//! - `saga`: compensating actions fed by their own results
//!
//! RULES:
//! - No storage access; steps are supplied by the caller

pub mod saga;
pub mod transaction;

pub use saga::CompensatingTransaction;
pub use transaction::{StepState, TransactionManager};
