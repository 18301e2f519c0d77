//! Feature Store, pluggable inference, IP allow-listing, and batch
//! processing for the scoring consumer (spec.md §4.4).

pub mod allowlist;
pub mod consumer;
pub mod feature_store;
pub mod inference;

pub use allowlist::AllowList;
pub use consumer::{BatchProcessor, Verdict};
pub use feature_store::FeatureStore;
pub use inference::{CpuBackend, InferenceBackend, ThreadedBackend, Weights};
