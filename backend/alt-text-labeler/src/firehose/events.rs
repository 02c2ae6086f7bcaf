//! Firehose event schemas

use serde::Deserialize;

/// Collection of `app.bsky.feed.post` records
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// A newly created post, as delivered by the event source
#[derive(Debug, Clone, PartialEq)]
pub struct PostEvent {
    /// Author DID
    pub did: String,
    /// Stream position of this event (microseconds since epoch)
    pub time_us: u64,
    /// Record key within the post collection
    pub rkey: String,
    /// Content identifier of the created record
    pub cid: Option<String>,
    pub record: PostRecord,
}

/// The parts of an `app.bsky.feed.post` record the labeler reads
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub embed: Option<Embed>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "$type")]
pub enum Embed {
    #[serde(rename = "app.bsky.embed.images")]
    Images {
        #[serde(default)]
        images: Vec<EmbedImage>,
    },
    /// External links, quotes, video, record-with-media, ...
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmbedImage {
    #[serde(default)]
    pub alt: Option<String>,
}

impl PostRecord {
    /// Decode a raw record, falling back to an empty record
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

/// What the event source tells the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A connection attempt is starting from `cursor`
    Connecting { cursor: u64 },
    /// Handshake completed; the stream resumes from `cursor`
    Open { cursor: u64 },
    /// A post was created in the subscribed collection
    Post(PostEvent),
    /// Any other event; only its position matters
    Progress { time_us: u64 },
    /// The connection closed
    Close,
    /// The connection failed
    Error(String),
}

impl StreamEvent {
    /// Stream position carried by this event, if any
    pub fn time_us(&self) -> Option<u64> {
        match self {
            StreamEvent::Post(post) => Some(post.time_us),
            StreamEvent::Progress { time_us } => Some(*time_us),
            _ => None,
        }
    }
}
