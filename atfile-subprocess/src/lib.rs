use anyhow::anyhow;
use atfile_core::{
    backend::{ChatBackend, MockBackend},
    editor::ActiveEditor,
    file::Workspace,
    Host, HostMessage, SettingsManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio::{io, io::AsyncWriteExt};
use tracing::{info, warn};

/// Serves the host protocol over stdin/stdout, one JSON envelope per line.
pub async fn run_subprocess(
    workspace_root: PathBuf,
    settings_path: Option<String>,
) -> anyhow::Result<()> {
    let settings_manager = match settings_path {
        Some(path) => SettingsManager::from_path(PathBuf::from(path))?,
        None => SettingsManager::new()?,
    };
    let settings = settings_manager.settings();

    let workspace = Workspace::new(workspace_root, settings.file.extra_ignore_patterns);
    // Provider clients are wired in by the extension; without one the host
    // echoes the composed prompt back.
    let backend: Arc<dyn ChatBackend> = Arc::new(MockBackend::default());
    warn!("No chat provider configured, using the {} backend", backend.name());

    let (host, mut response_rx) = Host::launch(workspace, backend, settings_manager);

    let mut join_set: JoinSet<anyhow::Result<()>> = JoinSet::new();

    join_set.spawn(async move {
        let mut stdout = io::stdout();
        while let Some(envelope) = response_rx.recv().await {
            let json = serde_json::to_string(&envelope)?;
            let json = format!("{json}\n");
            stdout.write_all(json.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok(())
    });

    join_set.spawn(async move {
        let mut stdin = BufReader::new(io::stdin()).lines();
        while let Some(line) = stdin.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Ok(message) => host.tx.send(message)?,
                Err(e) => warn!(?e, "Ignoring malformed input line"),
            }
        }
        info!("stdin closed, shutting down");
        Ok(())
    });

    if let Some(result) = join_set.join_next().await {
        return match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(anyhow!(e)),
            Err(panic) => Err(anyhow!(panic)),
        };
    }
    Ok(())
}

/// A line is either a request envelope or `{"editor": ...}` reporting the
/// focused document (`null` when no editor is active).
pub fn parse_line(line: &str) -> anyhow::Result<HostMessage> {
    let mut value: serde_json::Value = serde_json::from_str(line)?;
    if let Some(editor) = value.get_mut("editor") {
        let editor: Option<ActiveEditor> = serde_json::from_value(editor.take())?;
        return Ok(HostMessage::EditorChanged(editor));
    }
    Ok(HostMessage::Request(serde_json::from_value(value)?))
}
