mod base;
pub mod gopher_repetition;
pub mod latest_url;
mod result;
pub mod text;

pub use base::Filter;
pub use gopher_repetition::{GopherRepetitionConfig, GopherRepetitionFilter};
pub use latest_url::{LatestUrlConfig, LatestUrlFilter};
pub use result::{FilterResult, ThresholdMap};
pub use text::Language;
