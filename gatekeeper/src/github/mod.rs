//! GitHub-facing pieces: the published metadata ranges.

pub mod meta;

pub use meta::{GitHubMeta, MetaError, MetadataSource};
