//! kubestate scrape façade.
//!
//! Binds per-kind stores to their generator tables (`registry`), turns the registry into
//! one consistent set of families per scrape (`aggregator`), renders the text exposition
//! (`exposition`) and serves it over HTTP (`http`).

#![forbid(unsafe_code)]

pub mod aggregator;
pub mod exposition;
pub mod http;
pub mod registry;

pub use aggregator::{Aggregator, AggregatorConfig};
pub use exposition::{Exposition, TEXT_CONTENT_TYPE};
pub use http::{router, serve};
pub use registry::{Collector, CollectorRegistry, KindCollector, KindOutput};
