//! Streaming document curation: quality filters and near-duplicate cluster resolution.
//!
//! Documents flow through a [`pipeline::Pipeline`] as a lazy stream. Filters
//! annotate every document with the values they measured and either forward it
//! or route it to an exclusion sink; the cluster resolver keeps one document per
//! duplicate cluster.

pub mod config;
pub mod data;
pub mod dedup;
mod error;
pub mod filters;
pub mod io;
pub mod pipeline;
pub mod runtime;

pub use error::{Error, Result};
