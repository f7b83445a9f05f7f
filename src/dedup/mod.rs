//! Resolution of near-duplicate clusters produced by an upstream clustering stage.

pub mod keep_higher_quality;

pub use keep_higher_quality::{KeepHigherQuality, KeepHigherQualityConfig, SINGLETON_CLUSTER};
