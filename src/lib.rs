pub mod cli;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
mod metrics;
pub mod query;
pub mod ranker;
pub mod record;
pub mod searcher;
mod server;
pub mod signature;
pub mod source;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
pub use record::{NewRecord, RecordId, SearchMatch, StoredRecord};
pub use searcher::{ImageSearcher, ImageSearcherBuilder, SearchOptions};
pub use source::ImageSource;
