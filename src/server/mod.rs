//! TCP transport for the bridge.
//!
//! This module handles:
//! - Accepting client connections
//! - Line-delimited JSON framing (see [`wire`])
//! - Per-connection request fan-out and cancellation (see [`connection`])

pub mod connection;
pub mod wire;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;

use crate::bridge::Dispatcher;

// Re-exports for convenience
pub use connection::handle_connection;
pub use wire::{InboundFrame, OutboundFrame};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Transport tunables.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    pub max_frame_bytes: usize,
}

/// Accept connections until `shutdown` resolves.
pub async fn serve<H, F>(
    listener: TcpListener,
    dispatcher: Dispatcher<H>,
    settings: ServerSettings,
    shutdown: F,
) -> std::io::Result<()>
where
    H: Send + 'static,
    F: Future<Output = ()>,
{
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "bridge listening");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(conn = conn_id, peer = %peer, "client connected");
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            handle_connection(conn_id, reader, writer, dispatcher, settings).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received; no longer accepting connections");
                break;
            }
        }
    }
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{host_channel, DispatchSettings, DrainPolicy, Registry};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let (bridge, _host) = host_channel((), DrainPolicy::UntilEmpty);
        let registry: Registry<()> = Registry::builder().build();
        let dispatcher = Dispatcher::new(Arc::new(registry), bridge, DispatchSettings::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(serve(
            listener,
            dispatcher,
            ServerSettings { max_frame_bytes: 1024 },
            async move {
                let _ = rx.await;
            },
        ));

        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "accept loop did not stop");
    }
}
