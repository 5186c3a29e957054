use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type alias for link identifiers
pub type LinkId = Uuid;

/// Type alias for edge identifiers
pub type EdgeId = Uuid;

/// A page discovered by the crawler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    /// Unique identifier. Assigned by the store on first upsert and
    /// never changed afterwards.
    pub id: LinkId,

    /// Page URL. Unique across all links.
    pub url: String,

    /// Last time the page was fetched. Only ever moves forward.
    /// The Unix epoch means "never retrieved".
    pub retrieved_at: DateTime<Utc>,
}

impl Link {
    /// A link that has not been retrieved yet.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// A link fetched at the given time.
    pub fn with_retrieved_at(url: impl Into<String>, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            retrieved_at,
            ..Default::default()
        }
    }
}

/// A directed hyperlink from one link to another.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Edge {
    /// Unique identifier. Assigned by the store on first upsert.
    pub id: EdgeId,

    /// Page containing the hyperlink.
    pub src: LinkId,

    /// Page the hyperlink points to.
    pub dst: LinkId,

    /// Last time the edge was (re)discovered. Set by the store.
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(src: LinkId, dst: LinkId) -> Self {
        Self {
            src,
            dst,
            ..Default::default()
        }
    }
}
