use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod models;

#[derive(Parser)]
#[command(name = "veracity", version, about = "Video deepfake analysis")]
struct Cli {
    /// Talk to the daemon on the session bus instead of the system bus
    /// (also enabled by `VERACITY_SESSION_BUS`).
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a video file and print the verification record.
    Analyze {
        path: PathBuf,
    },
    /// Show daemon status.
    Status,
    /// Verify model files against their SHA256SUMS manifest.
    VerifyModels {
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session = cli.session || std::env::var_os("VERACITY_SESSION_BUS").is_some();
    match cli.command {
        Command::Analyze { path } => {
            let path = absolute(&path)?;
            tracing::debug!(path = %path.display(), "submitting video");
            let proxy = client::connect(session)
                .await
                .context("failed to connect to veracityd")?;
            let record = proxy
                .analyze_video(&path.to_string_lossy())
                .await
                .context("analysis request failed")?;
            print_json(&record)
        }
        Command::Status => {
            let proxy = client::connect(session)
                .await
                .context("failed to connect to veracityd")?;
            let status = proxy.status().await.context("status request failed")?;
            print_json(&status)
        }
        Command::VerifyModels { model_dir } => models::run(model_dir),
    }
}

/// The daemon resolves nothing relative to the caller, so send absolute paths.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("cannot determine current directory")?
        .join(path))
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["veracity", "--session", "analyze", "clip.mp4"]);
        assert!(cli.session);
        assert!(matches!(cli.command, Command::Analyze { ref path } if path == Path::new("clip.mp4")));

        let cli = Cli::parse_from(["veracity", "verify-models", "--model-dir", "/opt/models"]);
        assert!(matches!(
            cli.command,
            Command::VerifyModels { model_dir: Some(ref d) } if d == Path::new("/opt/models")
        ));
    }

    #[test]
    fn relative_paths_are_anchored() {
        let p = absolute(Path::new("clip.mp4")).unwrap();
        assert!(p.is_absolute());
        assert!(p.ends_with("clip.mp4"));
        assert_eq!(absolute(Path::new("/v/a.mp4")).unwrap(), PathBuf::from("/v/a.mp4"));
    }
}
