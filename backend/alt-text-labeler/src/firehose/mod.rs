//! Firehose Integration
//!
//! - Events: the post and stream-lifecycle messages the coordinator consumes
//! - Jetstream: WebSocket client that produces them

pub mod events;
pub mod jetstream;

pub use events::{Embed, EmbedImage, PostEvent, PostRecord, StreamEvent, POST_COLLECTION};
pub use jetstream::{decode_message, JetstreamConfig, JetstreamSource};
