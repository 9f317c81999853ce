//! Shipflow image build functionality
//!
//! This crate provides the build half of the Shipflow pipeline:
//! source snapshotting, step execution with content-addressed layers,
//! and the build cache that backs idempotent publishing.

pub mod builder;
pub mod cache;
pub mod error;
pub mod layer;
pub mod progress;
pub mod snapshot;

pub use builder::{BuildOptions, BuildOutcome, BuildWarning, ImageBuilder};
pub use cache::{BuildCache, default_cache_dir};
pub use error::{BuildError, BuildResult};
pub use progress::BuildProgress;
pub use snapshot::{SnapshotEntry, SourceSnapshot, Snapshotter};
