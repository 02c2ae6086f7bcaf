//! Alt-Text Labeler - flags image posts that are missing alt text
//!
//! This service provides:
//! - Jetstream firehose consumption with a resumable, checkpointed cursor
//! - Classification of one account's posts for undescribed images
//! - `no-alt-text` moderation labels, served through the label store's
//!   `queryLabels` endpoint

pub mod applier;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod error;
pub mod firehose;

pub use applier::{
    subject_uri, ApplyOutcome, LabelApplier, LabelRequest, LabelService, NO_ALT_TEXT_LABEL,
};
pub use classifier::classify;
pub use config::Config;
pub use coordinator::{ConnectionState, CoordinatorStats, StreamCoordinator};
pub use cursor::{load_or_init, now_micros, CursorStore, FileCursorStore, SharedCursor};
pub use error::{CursorError, FirehoseError, LabelError, LabelerError, Result};
pub use firehose::{JetstreamConfig, JetstreamSource, PostEvent, StreamEvent};
