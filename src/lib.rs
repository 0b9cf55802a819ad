//! Streaming single-flight HTTP response cache middleware.
//!
//! `streamcache` sits between a server framework and an upstream handler.
//! Cacheable responses are streamed to the requesting client while being
//! recorded into a storage buffer, and the cache entry becomes visible to
//! concurrent same-key requests before the body has finished arriving, so
//! they consume the in-flight response instead of hitting the upstream
//! again.
//!
//! The framework supplies two things: a [`ResponseWriter`] per connection
//! and an [`Upstream`] implementation. Everything else lives here: keying,
//! the per-key single-flight lock, `Vary` handling, freshness evaluation,
//! and the in-memory or on-disk body storage, configured through
//! [`Settings`].

pub mod cache;
pub mod clock;
pub mod freshness;
pub mod handler;
pub mod logging;
pub mod recorder;
pub mod response;
pub mod rules;
pub mod settings;
pub mod storage;

pub use cache::{CacheEntry, EvictionPolicy, HttpCache, NoEviction, request_key};
pub use clock::{Clock, ManualClock, SystemClock};
pub use handler::CacheHandler;
pub use recorder::{Recorder, ResponseHead};
pub use response::{ResponseWriter, Upstream};
pub use rules::CacheRule;
pub use settings::{Settings, StorageSettings};
pub use storage::{BodyBuffer, BufferReader, DiskStorage, MemoryStorage, Storage};
