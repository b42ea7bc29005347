//! One client connection.
//!
//! A reader loop decodes frames and submits them to the dispatcher in arrival
//! order; each accepted request gets a task that awaits its ticket and hands
//! the response to a single writer task. Requests on one connection therefore
//! run concurrently, while host-side order follows arrival order.
//!
//! When the client goes away, every async request it still has in flight is
//! cancelled.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;

use super::wire::{self, OutboundFrame};
use super::ServerSettings;
use crate::bridge::{BridgeError, Dispatcher, Request, RequestId, Response};

enum FrameRead {
    Line,
    TooLong,
    Eof,
}

/// Read one `\n`-terminated frame into `buf`, never buffering more than
/// `max + 1` bytes. An oversized frame is skipped through its newline.
async fn read_frame<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<FrameRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = (max as u64).saturating_add(1);
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(FrameRead::Eof);
    }
    if buf.last() == Some(&b'\n') || (buf.len() as u64) < limit {
        return Ok(FrameRead::Line);
    }

    loop {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        if n == 0 || buf.last() == Some(&b'\n') {
            break;
        }
    }
    buf.clear();
    Ok(FrameRead::TooLong)
}

/// Serve one connection until the client closes it.
pub async fn handle_connection<H, R, W>(
    conn_id: u64,
    reader: R,
    writer: W,
    dispatcher: Dispatcher<H>,
    settings: ServerSettings,
) where
    H: Send + 'static,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let writer_task = tokio::spawn(write_frames(conn_id, writer, rx));
    let in_flight: InFlight = Arc::new(DashMap::new());

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut seq: u64 = 0;
    loop {
        match read_frame(&mut reader, &mut buf, settings.max_frame_bytes).await {
            Ok(FrameRead::Eof) => break,
            Ok(FrameRead::TooLong) => {
                tracing::warn!(
                    conn = conn_id,
                    max = settings.max_frame_bytes,
                    "frame too large; skipped"
                );
                let err = BridgeError::Decode {
                    reason: format!("frame exceeds {} bytes", settings.max_frame_bytes),
                };
                let _ = tx.send(OutboundFrame::failure(Value::Null, &err));
            }
            Ok(FrameRead::Line) => {
                let line = trim_line(&buf);
                if line.is_empty() {
                    continue;
                }
                seq += 1;
                accept_frame(conn_id, seq, line, &dispatcher, &tx, &in_flight);
            }
            Err(e) => {
                tracing::warn!(conn = conn_id, error = %e, "read failed; closing connection");
                break;
            }
        }
    }

    let abandoned: Vec<RequestId> = in_flight.iter().map(|entry| entry.key().clone()).collect();
    let cancelled = abandoned.iter().filter(|id| dispatcher.cancel(id)).count();
    tracing::info!(conn = conn_id, in_flight = abandoned.len(), cancelled, "connection closed");

    drop(tx);
    let _ = writer_task.await;
}

/// Scheduled async requests of one connection, keyed by namespaced id. The
/// value is the frame sequence number that owns the entry.
type InFlight = Arc<DashMap<RequestId, u64>>;

/// Decode a line and either answer it directly or submit it for dispatch.
fn accept_frame<H: Send + 'static>(
    conn_id: u64,
    seq: u64,
    line: &[u8],
    dispatcher: &Dispatcher<H>,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
    in_flight: &InFlight,
) {
    let frame = match wire::decode(line) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(conn = conn_id, error = %e, "undecodable frame");
            let _ = tx.send(OutboundFrame::failure(Value::Null, &e));
            return;
        }
    };

    let client_id = frame.client_id();
    let params = match frame.params() {
        Ok(params) => params,
        Err(e) => {
            let _ = tx.send(OutboundFrame::failure(client_id, &e));
            return;
        }
    };

    // Ids are scoped to the connection so two clients may reuse the same id.
    let id = RequestId::new(format!("{conn_id}:{}", wire::render_id(&client_id)));

    if let Some(outcome) = wire::discovery_response(&frame.method, &dispatcher.capabilities()) {
        let _ = tx.send(OutboundFrame::new(client_id, &Response::new(id, outcome)));
        return;
    }

    // Only tickets holding a correlation entry are tracked. A task clears
    // only the entry it inserted.
    let ticket = dispatcher.submit(Request::with_id(id.clone(), frame.method, params));
    let tracked = ticket.is_scheduled();
    if tracked {
        in_flight.insert(id.clone(), seq);
    }

    let tx = tx.clone();
    let in_flight = Arc::clone(in_flight);
    tokio::spawn(async move {
        let response = ticket.response().await;
        if tracked {
            in_flight.remove_if(&id, |_, owner| *owner == seq);
        }
        if let Some(response) = response {
            let _ = tx.send(OutboundFrame::new(client_id, &response));
        }
    });
}

async fn write_frames<W>(
    conn_id: u64,
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let line = match frame.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(conn = conn_id, error = %e, "failed to serialize response");
                continue;
            }
        };
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::debug!(conn = conn_id, error = %e, "client stopped reading");
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::debug!(conn = conn_id, error = %e, "client stopped reading");
            break;
        }
    }
}

fn trim_line(buf: &[u8]) -> &[u8] {
    let end = buf
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    let start = buf[..end]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(end);
    &buf[start..end]
}

// ─── Tests ───────────────────────────────────────────────────────────────────
