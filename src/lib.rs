pub mod bridge;
pub mod config;
pub mod scene;
pub mod server;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use tokio::net::TcpListener;

use bridge::{host_channel, spawn_host_thread, DispatchSettings, Dispatcher};
use config::LoggingConfig;
use scene::EditorHost;
use server::ServerSettings;

/// Filter used when neither `RUST_LOG` nor `logging.filter` is set.
const DEFAULT_LOG_FILTER: &str = "mcp_host_bridge=info,warn";

/// Return the platform-standard data directory for the bridge.
///
/// - macOS: `~/Library/Application Support/mcp-host-bridge/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-host-bridge\`
/// - Linux: `$XDG_DATA_HOME/mcp-host-bridge/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-host-bridge/` only if none of the above can be resolved.
pub(crate) fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-host-bridge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-host-bridge")
}

/// Install the global subscriber described by `logging`.
///
/// File output (the default) rotates the previous `bridge.log` away first and
/// returns the new file's path; stderr output returns `None`.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<Option<PathBuf>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let configured = logging.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .with_context(|| format!("invalid log filter '{configured}'"))?;

    let (writer, log_path) = if logging.stderr {
        (None, None)
    } else {
        let log_dir = data_dir();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("failed to create {}", log_dir.display()))?;
        let log_path = log_dir.join("bridge.log");
        rotate_log_file(&log_path, 3);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open {}", log_path.display()))?;
        (Some(FlushingWriter::new(file)), Some(log_path))
    };

    let base = fmt::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true);

    let installed = match (writer, logging.json) {
        (Some(w), true) => base.json().with_ansi(false).with_writer(w).try_init(),
        (Some(w), false) => base.with_ansi(false).with_writer(w).try_init(),
        (None, true) => base.json().with_writer(std::io::stderr).try_init(),
        (None, false) => base.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(log_path)
}

/// Shift `bridge.log` into numbered backups, keeping `keep` of them.
///
/// `bridge.log.{keep}` is discarded, each `.n` moves to `.n+1`, and the live
/// file becomes `.1`. Gaps in the sequence are fine.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let numbered = |n: u32| PathBuf::from(format!("{}.{n}", base_path.display()));

    let _ = std::fs::remove_file(numbered(keep));
    for n in (1..keep).rev() {
        let _ = std::fs::rename(numbered(n), numbered(n + 1));
    }
    if base_path.exists() {
        let _ = std::fs::rename(base_path, numbered(1));
    }
}

/// Log sink shared by every subscriber writer; each write is flushed to disk
/// before returning.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<File>>,
}

impl FlushingWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    fn locked(&self) -> io::Result<MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("log file mutex poisoned"))
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.locked()?;
        let written = file.write(buf)?;
        file.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.locked()?.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Start the bridge: host thread, dispatcher, and TCP transport.
///
/// Runs until Ctrl-C, then stops accepting connections, shuts the host loop
/// down, and waits for the host thread to exit.
pub fn run() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let (config, config_path) = config::load_config(&cwd)?;
    let log_path = init_tracing(&config.logging)?;

    // Startup banner
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        log_file = ?log_path,
        pid = std::process::id(),
        "=== mcp-host-bridge starting ==="
    );

    let registry = Arc::new(scene::registry()?);
    tracing::info!(operations = ?registry.names(), "registry built");

    let editor = EditorHost::new(config.project.scenes_dir.clone())
        .with_seed_scenes(&config.project.seed_scenes);
    let (bridge, host) = host_channel(editor, config.host.drain_policy());
    let host_thread = spawn_host_thread(host, config.host.cycle_interval())
        .context("failed to start host thread")?;

    let dispatcher = Dispatcher::new(
        registry,
        bridge.clone(),
        DispatchSettings {
            async_timeout: config.dispatch.async_timeout(),
        },
    );
    let addr = config.listen_addr()?;
    let settings = ServerSettings {
        max_frame_bytes: config.server.max_frame_bytes,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let served = runtime.block_on(async {
        let reaper = dispatcher.spawn_reaper(config.dispatch.reap_interval());
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C; running until killed");
                std::future::pending::<()>().await;
            }
        };
        let result = server::serve(listener, dispatcher.clone(), settings, shutdown).await;
        reaper.abort();
        result.context("transport failed")
    });

    bridge.shutdown();
    let editor = host_thread
        .join()
        .map_err(|_| anyhow::anyhow!("host thread panicked"))?;
    tracing::info!(
        open_scenes = editor.open_scenes().len(),
        pending = dispatcher.pending_count(),
        "=== mcp-host-bridge stopped ==="
    );

    served
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_log_file_keeps_three() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("bridge.log");
        for generation in 0..5 {
            std::fs::write(&base, format!("gen {generation}")).unwrap();
            rotate_log_file(&base, 3);
        }

        assert!(!base.exists());
        let read = |suffix: u32| {
            std::fs::read_to_string(format!("{}.{suffix}", base.display())).unwrap()
        };
        assert_eq!(read(1), "gen 4");
        assert_eq!(read(2), "gen 3");
        assert_eq!(read(3), "gen 2");
        assert!(!Path::new(&format!("{}.4", base.display())).exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line one\n").unwrap();
        let mut clone = writer.clone();
        clone.write_all(b"line two\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line one\nline two\n");
    }

    #[test]
    fn test_data_dir_is_named_for_the_bridge() {
        let dir = data_dir();
        let name = dir.file_name().unwrap().to_string_lossy();
        assert!(name.ends_with("mcp-host-bridge"));
    }
}
