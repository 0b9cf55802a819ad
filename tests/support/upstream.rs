use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;

use streamcache::{ResponseWriter, Upstream};

/// Scripted origin with call counting and a concurrency gauge around the
/// pre-header latency window, which is where single-flight serialization is
/// observable.
pub struct ScriptedUpstream {
    status: StatusCode,
    headers: Vec<(String, String)>,
    chunks: Vec<Vec<u8>>,
    body_from_request_header: Option<String>,
    pre_header_delay: Option<Duration>,
    between_chunk_delay: Option<Duration>,
    fail_after_first_chunk: bool,
    calls: AtomicUsize,
    windows_in_flight: AtomicUsize,
    peak_windows: AtomicUsize,
}

impl ScriptedUpstream {
    pub fn new(headers: &[(&str, &str)]) -> Arc<Self> {
        Self::with(headers).build()
    }

    pub fn with(headers: &[(&str, &str)]) -> ScriptedUpstreamBuilder {
        ScriptedUpstreamBuilder {
            inner: Self {
                status: StatusCode::OK,
                headers: headers
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
                chunks: vec![b"origin-payload".to_vec()],
                body_from_request_header: None,
                pre_header_delay: None,
                between_chunk_delay: None,
                fail_after_first_chunk: false,
                calls: AtomicUsize::new(0),
                windows_in_flight: AtomicUsize::new(0),
                peak_windows: AtomicUsize::new(0),
            },
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_latency_concurrency(&self) -> usize {
        self.peak_windows.load(Ordering::SeqCst)
    }
}

pub struct ScriptedUpstreamBuilder {
    inner: ScriptedUpstream,
}

impl ScriptedUpstreamBuilder {
    pub fn status(mut self, status: StatusCode) -> Self {
        self.inner.status = status;
        self
    }

    pub fn chunks(mut self, chunks: &[&[u8]]) -> Self {
        self.inner.chunks = chunks.iter().map(|chunk| chunk.to_vec()).collect();
        self
    }

    pub fn empty_body(mut self) -> Self {
        self.inner.chunks = Vec::new();
        self
    }

    pub fn body_from_request_header(mut self, name: &str) -> Self {
        self.inner.body_from_request_header = Some(name.to_string());
        self
    }

    pub fn pre_header_delay(mut self, delay: Duration) -> Self {
        self.inner.pre_header_delay = Some(delay);
        self
    }

    pub fn between_chunk_delay(mut self, delay: Duration) -> Self {
        self.inner.between_chunk_delay = Some(delay);
        self
    }

    pub fn fail_after_first_chunk(mut self) -> Self {
        self.inner.fail_after_first_chunk = true;
        self
    }

    pub fn build(self) -> Arc<ScriptedUpstream> {
        Arc::new(self.inner)
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn serve(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &http::Request<()>,
    ) -> Result<StatusCode> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let current = self.windows_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_windows.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.pre_header_delay {
            tokio::time::sleep(delay).await;
        }
        self.windows_in_flight.fetch_sub(1, Ordering::SeqCst);

        for (name, value) in &self.headers {
            writer.headers_mut().append(
                HeaderName::try_from(name.as_str()).expect("scripted header name"),
                HeaderValue::from_str(value).expect("scripted header value"),
            );
        }
        writer.write_head(self.status).await?;

        if *request.method() == http::Method::HEAD {
            return Ok(self.status);
        }

        let chunks: Vec<Vec<u8>> = match &self.body_from_request_header {
            Some(name) => {
                let value = request
                    .headers()
                    .get(name.as_str())
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default();
                vec![value.as_bytes().to_vec()]
            }
            None => self.chunks.clone(),
        };

        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0
                && let Some(delay) = self.between_chunk_delay
            {
                tokio::time::sleep(delay).await;
            }
            writer.write_body(chunk).await?;
            if self.fail_after_first_chunk {
                bail!("origin dropped the connection");
            }
        }

        Ok(self.status)
    }
}
