//! # Knowledge-Graph Repository Test Suite
//!
//! Cross-crate flows that no single crate can test on its own.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/            # Criterion benchmarks
//! └── src/integration/
//!     ├── concurrency_flows.rs   # CAS races, idempotent replay
//!     ├── query_flows.rs         # builder → cursor paging, spec algebra
//!     ├── resilience_flows.rs    # decorator chain, retry, breaker, batch
//!     └── unit_of_work_flows.rs  # atomic writes with events
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p kg-tests
//! cargo test -p kg-tests integration::query_flows
//! cargo bench -p kg-tests
//! ```

pub mod integration;
