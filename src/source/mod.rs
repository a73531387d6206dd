//! Source identity and transport: where a package comes from and how its
//! working copy is kept current.
pub mod fetcher;
pub mod locator;

pub use fetcher::{FetchedRepo, Fetcher, GitFetcher};
pub use locator::{SourceRef, locate};
