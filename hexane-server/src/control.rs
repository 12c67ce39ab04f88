//! Control channel
//!
//! A UNIX-domain socket speaking a newline-delimited text protocol:
//! `stats` returns a key=value dump, `reload` rebuilds the pipeline from
//! configuration and answers `ok` or `error: <message>`, `shutdown`
//! answers `ok` and starts the drain.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chrono::{DateTime, Utc};

use hexane_core::config::ControlSection;
use hexane_core::error::Result;
use hexane_core::stats::ServerStats;

/// Commands the control channel understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Stats,
    Reload,
    Shutdown,
}

impl ControlCommand {
    /// Parse one command line
    pub fn parse(line: &str) -> std::result::Result<ControlCommand, String> {
        match line.trim() {
            "" => Err("empty command".to_string()),
            "stats" => Ok(ControlCommand::Stats),
            "reload" => Ok(ControlCommand::Reload),
            "shutdown" => Ok(ControlCommand::Shutdown),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

/// Requests the control channel forwards into the server's main loop
pub enum ServerEvent {
    Reload {
        respond: oneshot::Sender<std::result::Result<(), String>>,
    },
    Shutdown,
}

/// The running control socket
pub struct ControlServer {
    task: JoinHandle<()>,
    path: std::path::PathBuf,
}

impl ControlServer {
    /// Bind the socket, apply permissions, and start serving
    pub fn spawn(
        section: &ControlSection,
        stats: Arc<ServerStats>,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<ControlServer> {
        // A stale socket file from a previous run blocks the bind
        if section.path.exists() {
            let _ = std::fs::remove_file(&section.path);
        }
        let listener = UnixListener::bind(&section.path)?;

        if let Some(mode) = section.mode {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&section.path, std::fs::Permissions::from_mode(mode))?;
        }
        info!(path = %section.path.display(), "Control socket listening");

        let task = tokio::spawn(accept_loop(listener, stats, events));
        Ok(ControlServer {
            task,
            path: section.path.clone(),
        })
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(Path::new(&self.path));
    }
}

async fn accept_loop(
    listener: UnixListener,
    stats: Arc<ServerStats>,
    events: mpsc::Sender<ServerEvent>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let stats = stats.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, stats, events).await {
                        debug!(error = %err, "Control client error");
                    }
                });
            }
            Err(err) => {
                error!(error = %err, "Control socket accept failed");
                break;
            }
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    stats: Arc<ServerStats>,
    events: mpsc::Sender<ServerEvent>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }

        match ControlCommand::parse(&line) {
            Ok(ControlCommand::Stats) => {
                let snapshot = stats.snapshot();
                let started: DateTime<Utc> = snapshot.started_at.into();
                writer
                    .write_all(
                        format!("started={}\n", started.format("%Y-%m-%dT%H:%M:%SZ")).as_bytes(),
                    )
                    .await?;
                writer.write_all(snapshot.format().as_bytes()).await?;
            }
            Ok(ControlCommand::Reload) => {
                let (respond, outcome) = oneshot::channel();
                if events.send(ServerEvent::Reload { respond }).await.is_err() {
                    writer.write_all(b"error: server is shutting down\n").await?;
                    continue;
                }
                match outcome.await {
                    Ok(Ok(())) => writer.write_all(b"ok\n").await?,
                    Ok(Err(message)) => {
                        warn!(error = %message, "Reload failed");
                        writer
                            .write_all(format!("error: {}\n", message).as_bytes())
                            .await?;
                    }
                    Err(_) => writer.write_all(b"error: reload aborted\n").await?,
                }
            }
            Ok(ControlCommand::Shutdown) => {
                writer.write_all(b"ok\n").await?;
                writer.flush().await?;
                let _ = events.send(ServerEvent::Shutdown).await;
                break;
            }
            Err(message) => {
                writer
                    .write_all(format!("error: {}\n", message).as_bytes())
                    .await?;
            }
        }
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ControlCommand::parse("stats"), Ok(ControlCommand::Stats));
        assert_eq!(ControlCommand::parse("reload\n"), Ok(ControlCommand::Reload));
        assert_eq!(
            ControlCommand::parse("  shutdown  "),
            Ok(ControlCommand::Shutdown)
        );
        assert!(ControlCommand::parse("").is_err());
        assert!(ControlCommand::parse("frobnicate").is_err());
    }

    #[tokio::test]
    async fn test_stats_and_shutdown_over_socket() {
        let dir = std::env::temp_dir().join(format!("hexane-ctl-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("control.sock");

        let section = ControlSection {
            path: path.clone(),
            mode: Some(0o600),
        };
        let stats = Arc::new(ServerStats::new());
        stats.record_rx(1);
        let (events_tx, mut events_rx) = mpsc::channel(4);

        let server = ControlServer::spawn(&section, stats, events_tx).unwrap();

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer.write_all(b"stats\n").await.unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("started="));

        // Read until the rx counter shows up
        let mut saw_rx = false;
        for _ in 0..100 {
            line.clear();
            reader.read_line(&mut line).await.unwrap();
            if line.trim() == "rx.total=1" {
                saw_rx = true;
                break;
            }
        }
        assert!(saw_rx);

        writer.write_all(b"shutdown\n").await.unwrap();
        loop {
            line.clear();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            if line.trim() == "ok" {
                break;
            }
        }

        match tokio::time::timeout(std::time::Duration::from_secs(1), events_rx.recv())
            .await
            .unwrap()
        {
            Some(ServerEvent::Shutdown) => {}
            _ => panic!("expected shutdown event"),
        }

        server.abort();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_unknown_command_gets_error() {
        let dir = std::env::temp_dir().join(format!("hexane-ctl2-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("control.sock");

        let section = ControlSection {
            path: path.clone(),
            mode: None,
        };
        let stats = Arc::new(ServerStats::new());
        let (events_tx, _events_rx) = mpsc::channel(4);
        let server = ControlServer::spawn(&section, stats, events_tx).unwrap();

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer.write_all(b"frobnicate\n").await.unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("error: unknown command"));

        server.abort();
        let _ = std::fs::remove_file(&path);
    }
}
