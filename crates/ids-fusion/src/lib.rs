//! The streaming correlation engine: composite-key caches, the HTTP
//! accumulator, connection-history counters, and the durability sidecars
//! that back them (spec.md §3, §4.2, §4.3, §4.5).

pub mod cache;
pub mod counters;
pub mod durability;
pub mod engine;
pub mod history;
pub mod http_acc;

pub use engine::FusionEngine;
pub use history::ConnectionCounters;
