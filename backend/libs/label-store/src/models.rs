//! Label data model
//!
//! Labels follow the `com.atproto.label.defs#label` shape: the signature is
//! rendered as a `{"$bytes": "<base64>"}` object and `neg` is omitted when
//! false.

use crate::error::{LabelStoreError, LabelStoreResult};
use serde::{Deserialize, Serialize};

/// Label format version written on every label
pub const LABEL_VERSION: i64 = 1;

/// Longest label value accepted
pub const MAX_LABEL_VALUE_LEN: usize = 128;

/// Request to create (or negate) a label on a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLabel {
    /// Subject URI (`at://...`) or account DID
    pub uri: String,
    /// Content identifier pinning a specific record version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Label value, e.g. `no-alt-text`
    pub val: String,
    /// True retracts a previously applied label
    #[serde(default)]
    pub neg: bool,
}

impl CreateLabel {
    pub fn validate(&self) -> LabelStoreResult<()> {
        if !(self.uri.starts_with("at://") || self.uri.starts_with("did:")) {
            return Err(LabelStoreError::InvalidRequest(format!(
                "subject must be an at:// URI or DID, got '{}'",
                self.uri
            )));
        }
        if self.val.is_empty() || self.val.len() > MAX_LABEL_VALUE_LEN {
            return Err(LabelStoreError::InvalidRequest(format!(
                "label value must be 1..={} bytes",
                MAX_LABEL_VALUE_LEN
            )));
        }
        if matches!(self.cid.as_deref(), Some("")) {
            return Err(LabelStoreError::InvalidRequest(
                "cid must be omitted rather than empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// The signed portion of a label, in canonical field order
#[derive(Debug, Serialize)]
pub struct UnsignedLabel<'a> {
    pub ver: i64,
    pub src: &'a str,
    pub uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<&'a str>,
    pub val: &'a str,
    #[serde(skip_serializing_if = "is_false")]
    pub neg: bool,
    pub cts: &'a str,
}

/// A stored, signed label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Store sequence number; not part of the wire format
    #[serde(skip)]
    pub seq: i64,
    pub ver: i64,
    pub src: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub val: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub neg: bool,
    pub cts: String,
    #[serde(with = "bytes_object")]
    pub sig: Vec<u8>,
}

impl Label {
    pub fn unsigned(&self) -> UnsignedLabel<'_> {
        UnsignedLabel {
            ver: self.ver,
            src: &self.src,
            uri: &self.uri,
            cid: self.cid.as_deref(),
            val: &self.val,
            neg: self.neg,
            cts: &self.cts,
        }
    }
}

/// Database row for the labels table
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LabelRow {
    pub id: i64,
    pub src: String,
    pub uri: String,
    pub cid: Option<String>,
    pub val: String,
    pub neg: bool,
    pub cts: String,
    pub sig: Vec<u8>,
}

impl From<LabelRow> for Label {
    fn from(row: LabelRow) -> Self {
        Self {
            seq: row.id,
            ver: LABEL_VERSION,
            src: row.src,
            uri: row.uri,
            cid: row.cid,
            val: row.val,
            neg: row.neg,
            cts: row.cts,
            sig: row.sig,
        }
    }
}

/// Filter for `query_labels`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelQuery {
    /// Exact URIs, or prefixes when ending in `*`
    pub uri_patterns: Vec<String>,
    /// Restrict to these labeler DIDs; empty means any
    pub sources: Vec<String>,
    /// Return labels with a sequence number greater than this
    pub cursor: Option<i64>,
    pub limit: Option<i64>,
}

/// One page of `query_labels` results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPage {
    pub labels: Vec<Label>,
    /// Sequence number of the last label in the page
    pub cursor: Option<i64>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

mod bytes_object {
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct BytesObject {
        #[serde(rename = "$bytes")]
        bytes: String,
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        BytesObject {
            bytes: STANDARD_NO_PAD.encode(bytes),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let object = BytesObject::deserialize(deserializer)?;
        STANDARD_NO_PAD
            .decode(object.bytes.trim_end_matches('='))
            .map_err(serde::de::Error::custom)
    }
}
