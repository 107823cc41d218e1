use anyhow::Result;
use atfile_subprocess::run_subprocess;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut workspace_root: Option<PathBuf> = None;
    let mut settings_path: Option<String> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--workspace-root" => {
                i += 1;
                if i < args.len() {
                    workspace_root = Some(PathBuf::from(&args[i]));
                }
            }
            "--settings-path" => {
                i += 1;
                if i < args.len() {
                    settings_path = Some(args[i].clone());
                }
            }
            _ => {}
        }
        i += 1;
    }

    setup_tracing()?;

    let workspace_root = match workspace_root {
        Some(root) => root,
        None => env::current_dir()?,
    };
    info!("Serving workspace {:?}", workspace_root);

    run_subprocess(workspace_root, settings_path).await
}

// stdout carries the protocol, so traces go to a file
fn setup_tracing() -> Result<()> {
    use std::fs;
    use tracing_subscriber::fmt;

    let home = dirs::home_dir().unwrap_or_else(env::temp_dir);
    let trace_dir = home.join(".atfile").join("trace");
    fs::create_dir_all(&trace_dir)?;

    let log_file = trace_dir.join("atfile-subprocess.log");
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter)
        .init();

    info!("Tracing initialized to {:?}", log_file);
    Ok(())
}
