//! Incremental change detection for the resilient indexer.
//!
//! Decides whether an entity needs re-indexing and computes the minimal
//! set of content chunks to re-embed.
//!
//! ## Key Components
//!
//! - [`content_checksum`]: SHA-256 fingerprint of entity content
//! - [`diff_lines`]: line diff grouped into added/removed/modified runs
//! - [`Chunker`]: span-splitting collaborator ([`LineChunker`] by default)
//! - [`SnapshotStore`]: persistence of the last indexed snapshot
//! - [`ChangeDetector`]: ties the above together with deferred commits
//!
//! ## Commit protocol
//!
//! `detect_and_chunk` stages the new snapshot as pending. The caller must
//! call [`ChangeDetector::commit`] once the embedding backend accepted the
//! chunks, or [`ChangeDetector::discard`] if it did not. Until a commit,
//! the entity is not considered indexed and the same chunks are produced
//! again on the next detection.

pub mod checksum;
pub mod chunker;
pub mod detector;
pub mod diff;
pub mod error;
pub mod store;

pub use checksum::content_checksum;
pub use chunker::{Chunker, LineChunker, TextSpan};
pub use detector::{ChangeDetector, ChangeKind, ChangeSet, DetectorConfig};
pub use diff::{diff_lines, DiffRun, RunKind};
pub use error::DetectError;
pub use store::{InMemorySnapshotStore, SnapshotStore};
