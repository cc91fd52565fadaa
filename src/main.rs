//! ariel-store
//!
//! Operator tool for the Ariel dubbing bucket: upload trigger objects and
//! wait on the backend the same way the UI does.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use ariel_store::config::{Backend, StoreConfig};
use ariel_store::object_store::{IfMatch, ObjectStore, PutRequest};
use ariel_store::poll::{FailureKind, PollError, PollPolicy, PollingFetcher};
use ariel_store::session::{DubbingSession, SessionError, Utterance};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ariel-store")]
#[command(about = "Poll and upload objects in the Ariel dubbing bucket", long_about = None)]
struct Cli {
    /// Storage backend: local, gcs or s3
    #[arg(long, global = true, env = "ARIEL_BACKEND", default_value = "gcs")]
    backend: Backend,

    /// Bucket name (gcs, s3)
    #[arg(long, global = true, env = "ARIEL_BUCKET")]
    bucket: Option<String>,

    /// Root directory (local)
    #[arg(long, global = true, env = "ARIEL_LOCAL_ROOT")]
    root: Option<PathBuf>,

    /// Endpoint override (gcs, s3)
    #[arg(long, global = true, env = "ARIEL_ENDPOINT")]
    endpoint: Option<String>,

    /// OAuth access token (gcs)
    #[arg(long, global = true, env = "ARIEL_GCS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct PollArgs {
    /// Wait between attempts, in milliseconds
    #[arg(long, default_value_t = 15_000)]
    delay_ms: u64,

    /// Retries after the first attempt
    #[arg(long, default_value_t = 20)]
    max_retries: u32,
}

impl From<PollArgs> for PollPolicy {
    fn from(args: PollArgs) -> Self {
        PollPolicy::from_millis(args.delay_ms, args.max_retries)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for an object to appear and download it
    Fetch {
        key: String,
        #[command(flatten)]
        poll: PollArgs,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Wait for an object to be deleted
    WaitAbsent {
        key: String,
        #[command(flatten)]
        poll: PollArgs,
    },

    /// Upload a file
    Put {
        key: String,
        file: PathBuf,
        /// Defaults from the file extension
        #[arg(long)]
        content_type: Option<String>,
        /// Fail if the object already exists
        #[arg(long)]
        if_absent: bool,
    },

    /// Start a dubbing session for a video and wait for its utterances
    Submit {
        video: PathBuf,
        /// Dubbing configuration (JSON object)
        #[arg(long)]
        config: PathBuf,
    },

    /// Send edited utterances for re-translation
    Preview { folder: String, utterances: PathBuf },

    /// Approve utterances and download the dubbed video
    Approve {
        folder: String,
        utterances: PathBuf,
        #[arg(long, short)]
        output: PathBuf,
    },
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("json") => "application/json",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

async fn read_utterances(path: &Path) -> Result<Vec<Utterance>> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parse utterances from {}", path.display()))
}

async fn write_output(output: Option<&Path>, data: &[u8]) -> Result<()> {
    match output {
        Some(path) => tokio::fs::write(path, data)
            .await
            .with_context(|| format!("write {}", path.display())),
        None => {
            use std::io::Write;
            std::io::stdout().write_all(data).context("write stdout")
        }
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let config = StoreConfig {
        backend: cli.backend,
        bucket: cli.bucket,
        root: cli.root,
        endpoint: cli.endpoint,
        token: cli.token,
    };
    let store = config.build().await.context("open store")?;
    let fetcher = PollingFetcher::new(store.clone()).with_cancellation(cancel);

    match cli.command {
        Commands::Fetch { key, poll, output } => {
            let data = fetcher.fetch_when_present(&key, poll.into()).await?;
            write_output(output.as_deref(), &data).await?;
        }
        Commands::WaitAbsent { key, poll } => {
            fetcher.wait_until_absent(&key, poll.into()).await?;
            info!(%key, "object is gone");
        }
        Commands::Put {
            key,
            file,
            content_type,
            if_absent,
        } => {
            let body = tokio::fs::read(&file)
                .await
                .with_context(|| format!("read {}", file.display()))?;
            let content_type = content_type.unwrap_or_else(|| content_type_for(&file).to_string());
            let cond = if if_absent { IfMatch::NoneMatch } else { IfMatch::Any };
            let etag = store
                .put(&PutRequest::new(key.clone(), body, content_type), cond)
                .await
                .with_context(|| format!("upload {key}"))?;
            println!("{etag}");
        }
        Commands::Submit { video, config } => {
            let name = video
                .file_name()
                .and_then(|n| n.to_str())
                .context("video path has no file name")?;
            let body = tokio::fs::read(&video)
                .await
                .with_context(|| format!("read {}", video.display()))?;
            let raw = tokio::fs::read(&config)
                .await
                .with_context(|| format!("read {}", config.display()))?;
            let config: serde_json::Value = serde_json::from_slice(&raw).context("parse dubbing config")?;

            let session = DubbingSession::start(fetcher, name);
            info!(folder = session.folder(), "session started");
            let submission = session.submit(body, content_type_for(&video), &config).await?;
            let out = serde_json::json!({
                "folder": session.folder(),
                "utterances": submission.utterances,
                "voices": submission.voices,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Preview { folder, utterances } => {
            let utterances = read_utterances(&utterances).await?;
            let refreshed = DubbingSession::resume(fetcher, folder).preview(&utterances).await?;
            println!("{}", serde_json::to_string_pretty(&refreshed)?);
        }
        Commands::Approve {
            folder,
            utterances,
            output,
        } => {
            let utterances = read_utterances(&utterances).await?;
            let video = DubbingSession::resume(fetcher, folder).approve(&utterances).await?;
            write_output(Some(output.as_path()), &video).await?;
            info!(output = %output.display(), "dubbed video saved");
        }
    }
    Ok(())
}

fn failure_kind(err: &anyhow::Error) -> FailureKind {
    let poll = err.downcast_ref::<PollError>().or_else(|| match err.downcast_ref::<SessionError>() {
        Some(SessionError::Poll(poll)) => Some(poll),
        _ => None,
    });
    poll.map(PollError::kind).unwrap_or(FailureKind::Failed)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = failure_kind(&err);
            error!("{}: {err:#}", kind.user_message());
            match kind {
                FailureKind::TimedOut => ExitCode::from(2),
                FailureKind::Failed | FailureKind::Cancelled => ExitCode::FAILURE,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_utterances_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("utterances.json");
        let body = r#"[{"start":0.0,"end":1.0,"text":"hi","for_dubbing":true,"speaker_id":"s1",
            "ssml_gender":"Female","assigned_voice":"en-US-Journey-F"}]"#;
        tokio::fs::write(&path, body).await.unwrap();

        let utterances = read_utterances(&path).await.unwrap();
        assert_eq!(utterances.len(), 1);
        assert_eq!(utterances[0].speaker_id, "s1");

        let missing = read_utterances(&tmp.path().join("nope.json")).await.unwrap_err();
        assert!(format!("{missing:#}").contains("nope.json"));
    }

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(content_type_for(Path::new("clip.MP4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("config.json")), "application/json");
        assert_eq!(content_type_for(Path::new("notes")), "application/octet-stream");
    }
}
