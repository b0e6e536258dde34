//! Process management for the tg-bridge subprocess.
//!
//! The connector writes one JSON event per stdout line and free-form
//! diagnostics on stderr. Both streams are pumped into the same event
//! channel; commands go back as JSON lines on stdin.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::protocol::{BridgeCommand, BridgeEvent};

const BRIDGE_BINARY: &str = "tg-bridge";

/// How long the bridge gets to exit after `disconnect` before it is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the bridge process
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path to the tg-bridge binary
    pub binary_path: PathBuf,
    /// Session name the bridge keeps its authorization under
    pub session_name: String,
    pub api_id: i64,
    pub api_hash: String,
    /// Proxy URL passed through to the bridge, e.g. `socks5://127.0.0.1:1080`
    pub proxy: Option<String>,
    /// Enable verbose logging in the bridge
    pub verbose: bool,
}

impl BridgeConfig {
    /// Command-line arguments for the connector
    fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--session".into(),
            self.session_name.clone().into(),
            "--api-id".into(),
            self.api_id.to_string().into(),
            "--api-hash".into(),
            self.api_hash.clone().into(),
        ];
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".into());
            args.push(proxy.clone().into());
        }
        if self.verbose {
            args.push("--verbose".into());
        }
        args
    }
}

/// A running connector subprocess
pub struct BridgeProcess {
    child: Child,
    stdin: ChildStdin,
}

impl BridgeProcess {
    /// Start the connector and pump its output into `event_tx`
    pub async fn spawn(config: BridgeConfig, event_tx: mpsc::Sender<BridgeEvent>) -> Result<Self> {
        let mut child = Command::new(&config.binary_path)
            .args(config.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {} at {:?}", BRIDGE_BINARY, config.binary_path))?;

        let stdout = child.stdout.take().context("Bridge stdout was not piped")?;
        let stderr = child.stderr.take().context("Bridge stderr was not piped")?;
        let stdin = child.stdin.take().context("Bridge stdin was not piped")?;

        tokio::spawn(pump_lines(stdout, event_tx.clone(), parse_event_line));
        tokio::spawn(pump_lines(stderr, event_tx, stderr_event));

        debug!("Spawned {} (pid {:?})", BRIDGE_BINARY, child.id());
        Ok(Self { child, stdin })
    }

    /// Write one command line to the connector
    pub async fn send_command(&mut self, cmd: &BridgeCommand) -> Result<()> {
        let line = encode_command(cmd)?;
        self.stdin
            .write_all(line.as_bytes())
            .await
            .context("Failed to write command to bridge")?;
        self.stdin.flush().await.context("Failed to flush bridge stdin")
    }

    /// Ask the connector to disconnect, killing it if it does not exit in time
    pub async fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.send_command(&BridgeCommand::Disconnect).await {
            debug!("Bridge did not take the disconnect command: {}", e);
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(status) => {
                let status = status.context("Failed to wait for bridge process")?;
                debug!("Bridge exited with {}", status);
            }
            Err(_) => {
                warn!("Bridge ignored disconnect for {:?}, killing it", SHUTDOWN_GRACE);
                self.child.kill().await.context("Failed to kill bridge process")?;
            }
        }
        Ok(())
    }
}

/// Forward each non-blank line as an event until the stream ends or the
/// receiver goes away
async fn pump_lines<R>(stream: R, event_tx: mpsc::Sender<BridgeEvent>, to_event: fn(&str) -> BridgeEvent)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("Bridge stream closed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if event_tx.send(to_event(&line)).await.is_err() {
            break;
        }
    }
}

/// Parse one stdout line. Lines that aren't valid events become warnings
/// so a single malformed payload never stops the stream.
fn parse_event_line(line: &str) -> BridgeEvent {
    serde_json::from_str(line).unwrap_or_else(|e| BridgeEvent::Log {
        level: "warn".to_string(),
        message: format!("Failed to parse bridge event: {} - line: {}", e, line),
    })
}

fn stderr_event(line: &str) -> BridgeEvent {
    BridgeEvent::Log {
        level: "debug".to_string(),
        message: format!("[bridge] {}", line),
    }
}

fn encode_command(cmd: &BridgeCommand) -> Result<String> {
    let mut line = serde_json::to_string(cmd).context("Failed to encode bridge command")?;
    line.push('\n');
    Ok(line)
}

/// Places the connector binary is looked for, in order
fn bridge_candidates(exe: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(2);
    if let Some(dir) = exe.and_then(Path::parent) {
        candidates.push(dir.join(BRIDGE_BINARY));
    }
    candidates.push(Path::new(".").join(BRIDGE_BINARY));
    candidates
}

/// Locate tg-bridge next to the executable or in the working directory
pub fn find_bridge_binary() -> Result<PathBuf> {
    let exe = std::env::current_exe().ok();
    bridge_candidates(exe.as_deref())
        .into_iter()
        .find(|path| path.exists())
        .ok_or_else(|| {
            anyhow!(
                "Could not find {} next to the executable or in the working directory; pass --bridge-path",
                BRIDGE_BINARY
            )
        })
}
