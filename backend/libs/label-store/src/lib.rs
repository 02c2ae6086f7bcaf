//! # Label Store
//!
//! Storage and serving for moderation labels emitted by a labeler.
//!
//! - **Store**: append-only SQLite table of signed labels. Creating a label
//!   that is already in effect is a no-op, so callers may retry freely.
//! - **Signing**: HMAC-SHA256 over the canonical label encoding.
//! - **Listener**: actix-web server exposing
//!   `com.atproto.label.queryLabels`, `/health` and `/ready`.
//!
//! ## Usage Example
//!
//! ```ignore
//! use label_store::{CreateLabel, LabelSigner, LabelStore, LabelerServer};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = LabelSigner::from_hex("00112233")?;
//! let store = Arc::new(LabelStore::connect("labels.db", "did:plc:labeler", signer).await?);
//!
//! let server = LabelerServer::new(store.clone()).listen("127.0.0.1", 4100)?;
//!
//! store
//!     .create_label(CreateLabel {
//!         uri: "at://did:plc:abc/app.bsky.feed.post/xyz".to_string(),
//!         cid: None,
//!         val: "no-alt-text".to_string(),
//!         neg: false,
//!     })
//!     .await?;
//!
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod models;
pub mod server;
pub mod signing;
pub mod store;

pub use error::{LabelStoreError, LabelStoreResult};
pub use models::{CreateLabel, Label, LabelPage, LabelQuery, LABEL_VERSION};
pub use server::{LabelerServer, RunningServer};
pub use signing::LabelSigner;
pub use store::{LabelStore, IN_MEMORY};
