pub mod download;
pub mod manager;
pub mod manifest;
pub mod resolver;

pub use download::{format_bytes, Download, Fetched, Fetcher, HubFetcher, ModelDownloader};
pub use manager::{ModelManager, ModelStatus, PullOutcome, RemovedModel};
pub use manifest::{Manifest, ModelEntry};
pub use resolver::{ModelSource, ResolvedSource, Resolver};
