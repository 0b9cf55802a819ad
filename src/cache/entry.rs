use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use http::{HeaderMap, StatusCode};

use crate::storage::BodyBuffer;

/// Stored response record. The body buffer may still be filling while the
/// entry is visible in the index; readers follow it as bytes arrive.
#[derive(Clone)]
pub struct CacheEntry {
    /// Inbound header snapshot, kept for Vary comparison on later lookups.
    pub request_headers: HeaderMap,
    /// Upstream header snapshot, with the status annotation header removed.
    pub response_headers: HeaderMap,
    pub status: StatusCode,
    /// Absent for HEAD and other bodyless responses.
    pub body: Option<Arc<dyn BodyBuffer>>,
    pub expires_at: SystemTime,
    /// Private entries belong to their originating request only; the index
    /// never matches them and never stores them.
    pub is_public: bool,
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .field("expires_at", &self.expires_at)
            .field("is_public", &self.is_public)
            .finish_non_exhaustive()
    }
}
