//! SQLite-backed label storage
//!
//! Labels are append-only. `create_label` is idempotent: re-submitting the
//! label that is already in effect for a subject returns the stored label
//! and writes nothing.

use crate::error::{LabelStoreError, LabelStoreResult};
use crate::models::{
    CreateLabel, Label, LabelPage, LabelQuery, LabelRow, UnsignedLabel, LABEL_VERSION,
};
use crate::signing::LabelSigner;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

/// Path value that selects a private in-memory database
pub const IN_MEMORY: &str = ":memory:";

pub const DEFAULT_QUERY_LIMIT: i64 = 50;
pub const MAX_QUERY_LIMIT: i64 = 250;

const SELECT_LABELS: &str = "SELECT id, src, uri, cid, val, neg, cts, sig FROM labels";

pub struct LabelStore {
    pool: SqlitePool,
    src: String,
    signer: LabelSigner,
}

impl LabelStore {
    /// Open (or create) the store at `path` and apply migrations
    ///
    /// # Arguments
    ///
    /// * `path` - SQLite file path, or [`IN_MEMORY`]
    /// * `src` - DID of this labeler, stamped on every label
    /// * `signer` - Key used to sign new labels
    pub async fn connect(
        path: &str,
        src: impl Into<String>,
        signer: LabelSigner,
    ) -> LabelStoreResult<Self> {
        let pool = if path == IN_MEMORY {
            // Every connection to :memory: is a separate database, so pin one.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                .await?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);

            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;

        let src = src.into();
        info!(path = %path, src = %src, "Label store opened");

        Ok(Self { pool, src, signer })
    }

    /// DID stamped on labels created by this store
    pub fn src(&self) -> &str {
        &self.src
    }

    /// Create a label, or return the one already in effect
    ///
    /// The latest label for `(uri, val)` is in effect. If it has the same
    /// `neg` and `cid` as the request, nothing is written.
    pub async fn create_label(&self, request: CreateLabel) -> LabelStoreResult<Label> {
        request.validate()?;

        let mut tx = self.pool.begin().await?;

        let latest: Option<LabelRow> = sqlx::query_as(&format!(
            "{} WHERE src = ? AND uri = ? AND val = ? ORDER BY id DESC LIMIT 1",
            SELECT_LABELS
        ))
        .bind(&self.src)
        .bind(&request.uri)
        .bind(&request.val)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = latest {
            if row.neg == request.neg && row.cid == request.cid {
                debug!(
                    uri = %request.uri,
                    val = %request.val,
                    seq = row.id,
                    "Label already in effect, skipping write"
                );
                return Ok(row.into());
            }
        }

        let cts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let sig = self.signer.sign(&UnsignedLabel {
            ver: LABEL_VERSION,
            src: &self.src,
            uri: &request.uri,
            cid: request.cid.as_deref(),
            val: &request.val,
            neg: request.neg,
            cts: &cts,
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO labels (src, uri, cid, val, neg, cts, sig)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.src)
        .bind(&request.uri)
        .bind(&request.cid)
        .bind(&request.val)
        .bind(request.neg)
        .bind(&cts)
        .bind(&sig)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let seq = result.last_insert_rowid();
        info!(
            seq = seq,
            uri = %request.uri,
            val = %request.val,
            neg = request.neg,
            "Label created"
        );

        Ok(Label {
            seq,
            ver: LABEL_VERSION,
            src: self.src.clone(),
            uri: request.uri,
            cid: request.cid,
            val: request.val,
            neg: request.neg,
            cts,
            sig,
        })
    }

    /// Page through labels matching `query`, oldest first
    pub async fn query_labels(&self, query: &LabelQuery) -> LabelStoreResult<LabelPage> {
        if query.uri_patterns.is_empty() {
            return Err(LabelStoreError::InvalidRequest(
                "at least one uriPatterns value is required".to_string(),
            ));
        }

        let limit = query
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT);

        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_LABELS);
        builder.push(" WHERE id > ");
        builder.push_bind(query.cursor.unwrap_or(0));

        builder.push(" AND (");
        for (i, pattern) in query.uri_patterns.iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            match pattern.strip_suffix('*') {
                Some(prefix) => {
                    builder.push("uri LIKE ");
                    builder.push_bind(format!("{}%", escape_like(prefix)));
                    builder.push(" ESCAPE '\\'");
                }
                None => {
                    builder.push("uri = ");
                    builder.push_bind(pattern.clone());
                }
            }
        }
        builder.push(")");

        if !query.sources.is_empty() {
            builder.push(" AND src IN (");
            let mut sources = builder.separated(", ");
            for source in &query.sources {
                sources.push_bind(source.clone());
            }
            sources.push_unseparated(")");
        }

        builder.push(" ORDER BY id ASC LIMIT ");
        builder.push_bind(limit);

        let rows = builder
            .build_query_as::<LabelRow>()
            .fetch_all(&self.pool)
            .await?;
        let labels: Vec<Label> = rows.into_iter().map(Label::from).collect();
        let cursor = labels.last().map(|label| label.seq);

        Ok(LabelPage { labels, cursor })
    }

    /// All labels ever written for one subject, oldest first
    pub async fn labels_for_uri(&self, uri: &str) -> LabelStoreResult<Vec<Label>> {
        let rows: Vec<LabelRow> =
            sqlx::query_as(&format!("{} WHERE uri = ? ORDER BY id ASC", SELECT_LABELS))
                .bind(uri)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(Label::from).collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBJECT: &str = "at://did:plc:abc/app.bsky.feed.post/xyz";

    async fn memory_store() -> LabelStore {
        let signer = LabelSigner::from_hex("00112233").unwrap();
        LabelStore::connect(IN_MEMORY, "did:plc:labeler", signer)
            .await
            .expect("in-memory store")
    }

    fn no_alt(uri: &str, neg: bool) -> CreateLabel {
        CreateLabel {
            uri: uri.to_string(),
            cid: None,
            val: "no-alt-text".to_string(),
            neg,
        }
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("at://a_b/100%"), "at://a\\_b/100\\%");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[tokio::test]
    async fn test_create_label_is_idempotent() {
        let store = memory_store().await;

        let first = store.create_label(no_alt(SUBJECT, false)).await.unwrap();
        let second = store.create_label(no_alt(SUBJECT, false)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.labels_for_uri(SUBJECT).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_negation_and_reapplication_are_recorded() {
        let store = memory_store().await;

        store.create_label(no_alt(SUBJECT, false)).await.unwrap();
        let negated = store.create_label(no_alt(SUBJECT, true)).await.unwrap();
        store.create_label(no_alt(SUBJECT, true)).await.unwrap();
        let reapplied = store.create_label(no_alt(SUBJECT, false)).await.unwrap();

        assert!(negated.neg);
        assert!(!reapplied.neg);
        assert!(reapplied.seq > negated.seq);

        let history = store.labels_for_uri(SUBJECT).await.unwrap();
        let negs: Vec<bool> = history.iter().map(|l| l.neg).collect();
        assert_eq!(negs, vec![false, true, false]);
    }

    #[tokio::test]
    async fn test_created_labels_are_signed() {
        let signer = LabelSigner::from_hex("00112233").unwrap();
        let store = LabelStore::connect(IN_MEMORY, "did:plc:labeler", signer.clone())
            .await
            .unwrap();

        let label = store.create_label(no_alt(SUBJECT, false)).await.unwrap();
        assert_eq!(label.src, store.src());
        assert_eq!(store.src(), "did:plc:labeler");
        assert!(signer.verify(&label));

        let stored = store.labels_for_uri(SUBJECT).await.unwrap();
        assert!(signer.verify(&stored[0]));
    }

    #[tokio::test]
    async fn test_create_label_rejects_invalid_request() {
        let store = memory_store().await;
        let result = store.create_label(no_alt("not-a-uri", false)).await;
        assert!(matches!(result, Err(LabelStoreError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_query_labels_patterns_and_paging() {
        let store = memory_store().await;
        for rkey in ["a", "b", "c"] {
            let uri = format!("at://did:plc:abc/app.bsky.feed.post/{}", rkey);
            store.create_label(no_alt(&uri, false)).await.unwrap();
        }
        store
            .create_label(no_alt("at://did:plc:other/app.bsky.feed.post/z", false))
            .await
            .unwrap();

        let exact = store
            .query_labels(&LabelQuery {
                uri_patterns: vec!["at://did:plc:abc/app.bsky.feed.post/b".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(exact.labels.len(), 1);

        let first_page = store
            .query_labels(&LabelQuery {
                uri_patterns: vec!["at://did:plc:abc/*".to_string()],
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first_page.labels.len(), 2);

        let second_page = store
            .query_labels(&LabelQuery {
                uri_patterns: vec!["at://did:plc:abc/*".to_string()],
                limit: Some(2),
                cursor: first_page.cursor,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second_page.labels.len(), 1);
        assert!(second_page.labels[0].uri.ends_with("/c"));

        let everything = store
            .query_labels(&LabelQuery {
                uri_patterns: vec!["*".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(everything.labels.len(), 4);
    }

    #[tokio::test]
    async fn test_query_labels_filters_sources_and_requires_patterns() {
        let store = memory_store().await;
        store.create_label(no_alt(SUBJECT, false)).await.unwrap();

        let foreign = store
            .query_labels(&LabelQuery {
                uri_patterns: vec!["*".to_string()],
                sources: vec!["did:plc:someone-else".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(foreign.labels.is_empty());
        assert_eq!(foreign.cursor, None);

        let missing = store.query_labels(&LabelQuery::default()).await;
        assert!(matches!(missing, Err(LabelStoreError::InvalidRequest(_))));
    }
}
