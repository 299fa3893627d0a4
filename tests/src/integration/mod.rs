//! Integration flows across the repository core crates.

mod concurrency_flows;
mod query_flows;
mod resilience_flows;
mod unit_of_work_flows;
