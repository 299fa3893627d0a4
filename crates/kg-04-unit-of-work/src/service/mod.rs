//! Service Layer - orchestration over the ports
//!
//! - `unit_of_work`: one storage transaction plus buffered domain events
//! - `decorators`: logging, metrics, caching and resilience wrappers
//! - `consistency`: graph integrity checks

pub mod consistency;
pub mod decorators;
pub mod unit_of_work;

pub use consistency::ConsistencyChecker;
pub use decorators::{
    CachingLayer, CachingNodeRepository, DecoratorChain, LoggingLayer, MetricsLayer,
    RepositoryLayer, ResilienceLayer,
};
pub use unit_of_work::{EventSink, UnitOfWork, UnitOfWorkScope, UnitOfWorkState};
