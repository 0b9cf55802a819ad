use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, oneshot};

use crate::response::{ResponseWriter, Upstream};

/// Snapshot of the response head, taken before the status line reaches the
/// downstream client. The header map is a deep clone, so later mutations on
/// the downstream writer cannot alter what gets stored.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Response sink handed to the upstream handler. Every write is teed: body
/// bytes are published on the body channel for a recording task and then
/// forwarded to the downstream writer, so everything the client sees has
/// also been offered for recording.
///
/// The body channel holds at most one chunk, which keeps the recording side
/// within one chunk of the downstream socket and lets a slow consumer apply
/// backpressure to the upstream.
pub struct Recorder<W> {
    downstream: W,
    wrote_head: bool,
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: mpsc::Sender<Bytes>,
}

impl<W> Recorder<W>
where
    W: ResponseWriter,
{
    pub fn new(downstream: W) -> (Self, oneshot::Receiver<ResponseHead>, mpsc::Receiver<Bytes>) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(1);
        let recorder = Self {
            downstream,
            wrote_head: false,
            head_tx: Some(head_tx),
            body_tx,
        };
        (recorder, head_rx, body_rx)
    }

    /// Runs the upstream handler against this recorder. Dropping the
    /// recorder afterwards closes the body channel, which is how the
    /// recording task learns the body is complete.
    pub async fn drive(
        mut self,
        upstream: Arc<dyn Upstream>,
        request: Arc<http::Request<()>>,
    ) -> Result<StatusCode> {
        let status = upstream.serve(&mut self, &request).await?;
        if !self.wrote_head {
            self.write_head(status).await?;
        }
        Ok(status)
    }
}

#[async_trait]
impl<W> ResponseWriter for Recorder<W>
where
    W: ResponseWriter,
{
    fn headers(&self) -> &HeaderMap {
        self.downstream.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.downstream.headers_mut()
    }

    async fn write_head(&mut self, status: StatusCode) -> Result<()> {
        if self.wrote_head {
            return Ok(());
        }
        self.wrote_head = true;
        if let Some(head_tx) = self.head_tx.take() {
            let _ = head_tx.send(ResponseHead {
                status,
                headers: self.downstream.headers().clone(),
            });
        }
        self.downstream.write_head(status).await
    }

    async fn write_body(&mut self, chunk: &[u8]) -> Result<()> {
        if !self.wrote_head {
            self.write_head(StatusCode::OK).await?;
        }
        self.body_tx
            .send(Bytes::copy_from_slice(chunk))
            .await
            .map_err(|_| anyhow!("response body consumer went away"))?;
        self.downstream.write_body(chunk).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.downstream.flush().await
    }
}
