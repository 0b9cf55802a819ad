use anyhow::Result;
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};

/// Downstream response sink the cache writes into.
///
/// The surrounding server framework supplies an implementation per
/// connection; the crate's [`Recorder`](crate::recorder::Recorder) wraps one
/// to tee the upstream output. Headers may be mutated freely until
/// `write_head` is called; implementations may assume `write_head` is called
/// at most once.
#[async_trait]
pub trait ResponseWriter: Send {
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Writes the status line and the current header map.
    async fn write_head(&mut self, status: StatusCode) -> Result<()>;

    async fn write_body(&mut self, chunk: &[u8]) -> Result<()>;

    async fn flush(&mut self) -> Result<()>;
}

/// The origin handler the cache fronts. It produces a response by setting
/// headers, writing a head and streaming body bytes into the supplied sink,
/// then reporting the status it served.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn serve(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &http::Request<()>,
    ) -> Result<StatusCode>;
}
