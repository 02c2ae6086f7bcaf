//! Label Applier
//!
//! Turns a qualifying post into a `no-alt-text` label on its subject URI.

use crate::error::LabelError;
use crate::firehose::{PostEvent, POST_COLLECTION};
use async_trait::async_trait;
use label_store::{CreateLabel, LabelStore};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label value applied to posts with undescribed images
pub const NO_ALT_TEXT_LABEL: &str = "no-alt-text";

/// A label-creation request sent to the labeling service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRequest {
    pub uri: String,
    pub cid: Option<String>,
    pub val: String,
    pub neg: bool,
}

/// The labeling service, as seen from the stream
///
/// Implementations must tolerate the same request arriving more than once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelService: Send + Sync {
    async fn create_label(&self, request: LabelRequest) -> Result<(), LabelError>;
}

#[async_trait]
impl LabelService for LabelStore {
    async fn create_label(&self, request: LabelRequest) -> Result<(), LabelError> {
        LabelStore::create_label(
            self,
            CreateLabel {
                uri: request.uri,
                cid: request.cid,
                val: request.val,
                neg: request.neg,
            },
        )
        .await
        .map(|_| ())
        .map_err(|e| LabelError::Service(e.to_string()))
    }
}

/// Canonical subject URI for a post
pub fn subject_uri(did: &str, rkey: &str) -> String {
    format!("at://{}/{}/{}", did, POST_COLLECTION, rkey)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The labeling service accepted the label
    Labeled,
    /// The subject was labeled recently; no call was made
    AlreadyLabeled,
}

pub struct LabelApplier {
    service: Arc<dyn LabelService>,
    timeout: Duration,
    recent: Option<Mutex<LruCache<String, ()>>>,
}

impl LabelApplier {
    /// # Arguments
    ///
    /// * `service` - Labeling service to call
    /// * `timeout` - Bound on a single label-creation call
    /// * `dedupe_capacity` - Recently labeled subjects to remember; 0 disables
    pub fn new(service: Arc<dyn LabelService>, timeout: Duration, dedupe_capacity: usize) -> Self {
        Self {
            service,
            timeout,
            recent: NonZeroUsize::new(dedupe_capacity)
                .map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Label the post's subject
    ///
    /// Errors are logged here with the subject URI and returned; callers
    /// keep consuming the stream either way.
    pub async fn apply(&self, event: &PostEvent) -> Result<ApplyOutcome, LabelError> {
        let uri = subject_uri(&event.did, &event.rkey);

        if let Some(recent) = &self.recent {
            if recent.lock().get(&uri).is_some() {
                debug!(uri = %uri, "Subject labeled recently, skipping");
                return Ok(ApplyOutcome::AlreadyLabeled);
            }
        }

        let request = LabelRequest {
            uri: uri.clone(),
            cid: event.cid.clone(),
            val: NO_ALT_TEXT_LABEL.to_string(),
            neg: false,
        };

        let result = tokio::time::timeout(self.timeout, self.service.create_label(request))
            .await
            .unwrap_or_else(|_| Err(LabelError::Timeout(self.timeout)));

        match result {
            Ok(()) => {
                if let Some(recent) = &self.recent {
                    recent.lock().put(uri.clone(), ());
                }
                info!(uri = %uri, label = NO_ALT_TEXT_LABEL, "Labeled post");
                Ok(ApplyOutcome::Labeled)
            }
            Err(e) => {
                warn!(uri = %uri, error = %e, "Failed to label post");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firehose::PostRecord;

    fn event(rkey: &str) -> PostEvent {
        PostEvent {
            did: "did:abc".to_string(),
            time_us: 1,
            rkey: rkey.to_string(),
            cid: Some("bafyreicid".to_string()),
            record: PostRecord::default(),
        }
    }

    #[test]
    fn test_subject_uri() {
        assert_eq!(
            subject_uri("did:abc", "xyz"),
            "at://did:abc/app.bsky.feed.post/xyz"
        );
    }

    #[tokio::test]
    async fn test_apply_sends_expected_request() {
        let mut service = MockLabelService::new();
        service
            .expect_create_label()
            .withf(|req| {
                req.uri == "at://did:abc/app.bsky.feed.post/xyz"
                    && req.cid.as_deref() == Some("bafyreicid")
                    && req.val == "no-alt-text"
                    && !req.neg
            })
            .times(1)
            .returning(|_| Ok(()));

        let applier = LabelApplier::new(Arc::new(service), Duration::from_secs(1), 0);
        let outcome = applier.apply(&event("xyz")).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Labeled);
    }

    #[tokio::test]
    async fn test_apply_returns_service_error() {
        let mut service = MockLabelService::new();
        service
            .expect_create_label()
            .times(1)
            .returning(|_| Err(LabelError::Service("boom".to_string())));

        let applier = LabelApplier::new(Arc::new(service), Duration::from_secs(1), 16);
        let result = applier.apply(&event("xyz")).await;
        assert!(matches!(result, Err(LabelError::Service(_))));
    }

    #[tokio::test]
    async fn test_recent_subjects_are_not_relabeled() {
        let mut service = MockLabelService::new();
        service
            .expect_create_label()
            .times(2)
            .returning(|_| Ok(()));

        let applier = LabelApplier::new(Arc::new(service), Duration::from_secs(1), 16);

        assert_eq!(applier.apply(&event("a")).await.unwrap(), ApplyOutcome::Labeled);
        assert_eq!(
            applier.apply(&event("a")).await.unwrap(),
            ApplyOutcome::AlreadyLabeled
        );
        assert_eq!(applier.apply(&event("b")).await.unwrap(), ApplyOutcome::Labeled);
    }

    #[tokio::test]
    async fn test_failed_subject_is_retried_next_time() {
        let mut service = MockLabelService::new();
        let mut seq = mockall::Sequence::new();
        service
            .expect_create_label()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(LabelError::Service("unavailable".to_string())));
        service
            .expect_create_label()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let applier = LabelApplier::new(Arc::new(service), Duration::from_secs(1), 16);

        assert!(applier.apply(&event("a")).await.is_err());
        assert_eq!(applier.apply(&event("a")).await.unwrap(), ApplyOutcome::Labeled);
    }

    #[tokio::test]
    async fn test_dedupe_disabled_calls_every_time() {
        let mut service = MockLabelService::new();
        service
            .expect_create_label()
            .times(3)
            .returning(|_| Ok(()));

        let applier = LabelApplier::new(Arc::new(service), Duration::from_secs(1), 0);
        for _ in 0..3 {
            applier.apply(&event("a")).await.unwrap();
        }
    }

    struct HangingService;

    #[async_trait]
    impl LabelService for HangingService {
        async fn create_label(&self, _request: LabelRequest) -> Result<(), LabelError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out() {
        let applier =
            LabelApplier::new(Arc::new(HangingService), Duration::from_millis(500), 16);
        let result = applier.apply(&event("a")).await;
        assert!(matches!(result, Err(LabelError::Timeout(d)) if d == Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn test_label_store_backend_dedupes() {
        let signer = label_store::LabelSigner::from_hex("0011").unwrap();
        let store = Arc::new(
            LabelStore::connect(label_store::IN_MEMORY, "did:plc:labeler", signer)
                .await
                .unwrap(),
        );

        // Local dedupe off so both calls reach the store
        let applier = LabelApplier::new(store.clone(), Duration::from_secs(5), 0);
        applier.apply(&event("xyz")).await.unwrap();
        applier.apply(&event("xyz")).await.unwrap();

        let labels = store
            .labels_for_uri("at://did:abc/app.bsky.feed.post/xyz")
            .await
            .unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].val, NO_ALT_TEXT_LABEL);
        assert_eq!(labels[0].cid.as_deref(), Some("bafyreicid"));
    }
}
