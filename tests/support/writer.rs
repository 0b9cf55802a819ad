use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;

use streamcache::ResponseWriter;

/// What a test client received: the head as written, and the body bytes in
/// arrival order.
#[derive(Debug, Default)]
pub struct RecordedResponse {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RecordedResponse {
    pub fn status_annotation(&self) -> Option<String> {
        self.headers
            .get(super::STATUS_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
    }
}

/// Downstream writer capturing everything into shared state the test can
/// inspect after the handler returns.
pub struct TestWriter {
    headers: HeaderMap,
    recorded: Arc<Mutex<RecordedResponse>>,
}

impl TestWriter {
    pub fn new() -> (Self, Arc<Mutex<RecordedResponse>>) {
        let recorded = Arc::new(Mutex::new(RecordedResponse::default()));
        (
            Self {
                headers: HeaderMap::new(),
                recorded: recorded.clone(),
            },
            recorded,
        )
    }
}

#[async_trait]
impl ResponseWriter for TestWriter {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write_head(&mut self, status: StatusCode) -> Result<()> {
        let mut recorded = self.recorded.lock();
        recorded.status = Some(status);
        recorded.headers = self.headers.clone();
        Ok(())
    }

    async fn write_body(&mut self, chunk: &[u8]) -> Result<()> {
        self.recorded.lock().body.extend_from_slice(chunk);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
