use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, HttpCache, key};
use crate::clock::{Clock, SystemClock};
use crate::freshness;
use crate::recorder::Recorder;
use crate::response::{ResponseWriter, Upstream};
use crate::rules::CacheRule;
use crate::settings::Settings;
use crate::storage::{BodyBuffer, Storage};

const STATUS_HIT: &str = "hit";
const STATUS_MISS: &str = "miss";
const STATUS_SKIP: &str = "skip";

/// Caching front for an upstream handler.
///
/// Each request is keyed, funneled through the per-key single-flight lock,
/// and either replayed from a stored entry or fetched upstream through a
/// recorder that streams the response to the client while a background task
/// copies it into a storage buffer. The entry becomes visible to same-key
/// waiters before its body finishes, so they stream from the filling buffer
/// instead of fetching again.
pub struct CacheHandler {
    cache: HttpCache,
    storage: Arc<dyn Storage>,
    upstream: Arc<dyn Upstream>,
    status_header: Option<HeaderName>,
    rules: Arc<[CacheRule]>,
    default_max_age: Duration,
    clock: Arc<dyn Clock>,
}

/// Bookkeeping for an in-progress upstream fetch, consumed by the handler
/// after the key's lock is released.
struct UpstreamFlight {
    entry: Arc<CacheEntry>,
    end_rx: oneshot::Receiver<()>,
    upstream_task: JoinHandle<Result<StatusCode>>,
}

impl CacheHandler {
    pub async fn new(settings: Settings, upstream: Arc<dyn Upstream>) -> Result<Self> {
        Self::with_clock(settings, upstream, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(
        settings: Settings,
        upstream: Arc<dyn Upstream>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let status_header = settings.status_header_name()?;
        let storage = crate::storage::from_settings(&settings.storage);
        storage.setup().await?;
        Ok(Self {
            cache: HttpCache::new(clock.clone()),
            storage,
            upstream,
            status_header,
            rules: settings.cache_rules.clone().into(),
            default_max_age: settings.default_max_age(),
            clock,
        })
    }

    pub fn cache(&self) -> &HttpCache {
        &self.cache
    }

    /// Serves one request, returning the status written downstream.
    pub async fn handle<W>(&self, mut writer: W, request: http::Request<()>) -> Result<StatusCode>
    where
        W: ResponseWriter + Send + 'static,
    {
        if !freshness::request_is_cacheable(request.method()) {
            self.annotate(&mut writer, STATUS_SKIP);
            return self.upstream.serve(&mut writer, &request).await;
        }

        let key = key::request_key(&request);
        let request = Arc::new(request);

        let mut written_status: Option<StatusCode> = None;
        let mut flight: Option<UpstreamFlight> = None;

        let matcher_request = request.clone();
        let status_ref = &mut written_status;
        let flight_ref = &mut flight;
        let key_ref = key.as_str();

        let result = self
            .cache
            .get_or_compute(
                &key,
                move |entry| {
                    key::vary_match(
                        &entry.response_headers,
                        &entry.request_headers,
                        matcher_request.headers(),
                    )
                },
                move |existing| async move {
                    match existing {
                        Some(entry) => {
                            self.replay_hit(&mut writer, &entry).await?;
                            *status_ref = Some(entry.status);
                            Ok(None)
                        }
                        None => {
                            let outcome = self.fetch_upstream(writer, request, key_ref).await?;
                            *status_ref = Some(outcome.entry.status);
                            let entry = outcome.entry.clone();
                            *flight_ref = Some(outcome);
                            Ok(Some(entry))
                        }
                    }
                },
            )
            .await;

        if let Some(flight) = flight {
            // The downstream write is complete only once the recording or
            // draining task has consumed the whole body channel.
            let _ = flight.end_rx.await;
            match flight.upstream_task.await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    self.discard_entry(&key, &flight.entry).await;
                    return Err(err);
                }
                Err(err) => {
                    self.discard_entry(&key, &flight.entry).await;
                    return Err(anyhow!("upstream task failed: {err}"));
                }
            }
        }
        result?;

        Ok(written_status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
    }

    async fn replay_hit<W>(&self, writer: &mut W, entry: &CacheEntry) -> Result<()>
    where
        W: ResponseWriter,
    {
        debug!("serving cached response");
        self.annotate(writer, STATUS_HIT);
        for (name, value) in entry.response_headers.iter() {
            writer.headers_mut().append(name.clone(), value.clone());
        }
        writer.write_head(entry.status).await?;
        if let Some(body) = &entry.body {
            let mut reader = body.new_reader();
            while let Some(chunk) = reader.next_chunk().await? {
                writer.write_body(&chunk).await?;
            }
        }
        Ok(())
    }

    /// Dispatches the upstream behind a recorder, waits for the response
    /// head, and decides what the body channel drains into: a storage
    /// buffer for cacheable responses, the void otherwise.
    async fn fetch_upstream<W>(
        &self,
        mut writer: W,
        request: Arc<http::Request<()>>,
        key: &str,
    ) -> Result<UpstreamFlight>
    where
        W: ResponseWriter + Send + 'static,
    {
        self.annotate(&mut writer, STATUS_MISS);

        let (recorder, head_rx, body_rx) = Recorder::new(writer);
        let upstream_task = tokio::spawn(recorder.drive(self.upstream.clone(), request.clone()));

        let head = head_rx
            .await
            .map_err(|_| anyhow!("upstream finished without writing a response head"))?;

        let mut response_headers = head.headers;
        if let Some(name) = &self.status_header {
            response_headers.remove(name);
        }

        let now = self.clock.now();
        let expires_at = freshness::response_expiration(
            &request,
            head.status,
            &response_headers,
            &self.rules,
            self.default_max_age,
            now,
        );

        let (end_tx, end_rx) = oneshot::channel();
        let request_headers = request.headers().clone();

        if let Some(expires_at) = expires_at {
            if *request.method() == Method::HEAD {
                spawn_drain(body_rx, end_tx);
                let entry = Arc::new(CacheEntry {
                    request_headers,
                    response_headers,
                    status: head.status,
                    body: None,
                    expires_at,
                    is_public: true,
                });
                return Ok(UpstreamFlight {
                    entry,
                    end_rx,
                    upstream_task,
                });
            }

            match self.storage.create(key).await {
                Ok(buffer) => {
                    let entry = Arc::new(CacheEntry {
                        request_headers,
                        response_headers,
                        status: head.status,
                        body: Some(buffer.clone()),
                        expires_at,
                        is_public: true,
                    });
                    self.spawn_record(body_rx, buffer, end_tx, key.to_string(), entry.clone());
                    return Ok(UpstreamFlight {
                        entry,
                        end_rx,
                        upstream_task,
                    });
                }
                Err(err) => {
                    warn!(error = %err, "failed to allocate cache buffer; serving uncached");
                    spawn_drain(body_rx, end_tx);
                    let entry = Arc::new(CacheEntry {
                        request_headers,
                        response_headers,
                        status: head.status,
                        body: None,
                        expires_at: now,
                        is_public: false,
                    });
                    return Ok(UpstreamFlight {
                        entry,
                        end_rx,
                        upstream_task,
                    });
                }
            }
        }

        spawn_drain(body_rx, end_tx);
        let entry = Arc::new(CacheEntry {
            request_headers,
            response_headers,
            status: head.status,
            body: None,
            expires_at: now,
            is_public: false,
        });
        Ok(UpstreamFlight {
            entry,
            end_rx,
            upstream_task,
        })
    }

    /// Copies the body channel into the storage buffer; if storage fails
    /// mid-stream the already visible entry is withdrawn and the rest of
    /// the channel is drained so the downstream write can finish.
    fn spawn_record(
        &self,
        mut body_rx: mpsc::Receiver<Bytes>,
        buffer: Arc<dyn BodyBuffer>,
        end_tx: oneshot::Sender<()>,
        key: String,
        entry: Arc<CacheEntry>,
    ) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut poisoned = false;
            while let Some(chunk) = body_rx.recv().await {
                if poisoned {
                    continue;
                }
                if let Err(err) = buffer.append(&chunk).await {
                    warn!(error = %err, "cache body write failed; discarding entry");
                    // Clear first: it wakes readers parked on this buffer,
                    // and those readers may be holding the key lock that
                    // `remove` needs.
                    let _ = buffer.clear().await;
                    cache.remove(&key, &entry).await;
                    poisoned = true;
                }
            }
            if !poisoned && let Err(err) = buffer.close().await {
                warn!(error = %err, "cache body finalize failed; discarding entry");
                let _ = buffer.clear().await;
                cache.remove(&key, &entry).await;
            }
            let _ = end_tx.send(());
        });
    }

    async fn discard_entry(&self, key: &str, entry: &Arc<CacheEntry>) {
        if !entry.is_public {
            return;
        }
        self.cache.remove(key, entry).await;
        if let Some(body) = &entry.body
            && let Err(err) = body.clear().await
        {
            warn!(error = %err, "failed to clear discarded cache body");
        }
    }

    fn annotate<W>(&self, writer: &mut W, value: &'static str)
    where
        W: ResponseWriter + ?Sized,
    {
        if let Some(name) = &self.status_header {
            writer
                .headers_mut()
                .insert(name.clone(), HeaderValue::from_static(value));
        }
    }
}

fn spawn_drain(mut body_rx: mpsc::Receiver<Bytes>, end_tx: oneshot::Sender<()>) {
    tokio::spawn(async move {
        while body_rx.recv().await.is_some() {}
        let _ = end_tx.send(());
    });
}
