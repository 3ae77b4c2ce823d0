use anyhow::{Context, Result};
use ci_artifacts::config::{Config, LoggingConfig};
use ci_artifacts::services::replay::{new_build_context, ReplayAdapter, StashSource};
use ci_artifacts::{
    ArchiveCoordinator, ArtifactError, BuildIdentity, HttpObjectStore, Manifest, NodeWorkspace, ObjectStore,
    RetryPolicy, StashCoordinator, StashOptions,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ci-artifacts", version, about = "Archive and stash build files in a generic artifact repository")]
struct Cli {
    /// Configuration file (YAML or TOML).
    #[arg(long, env = "CI_ARTIFACTS_CONFIG", default_value = ci_artifacts::config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Full name of the job, including folders.
    #[arg(long)]
    job: String,

    /// Build number assigned by the build engine.
    #[arg(long)]
    build: u64,

    /// Name of the execution node running this command.
    #[arg(long, default_value = "controller")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload workspace files matching the include patterns.
    Archive {
        #[arg(long)]
        workspace: PathBuf,
        #[arg(long = "include", required = true)]
        includes: Vec<String>,
        #[arg(long = "exclude")]
        excludes: Vec<String>,
        /// Write the resulting manifest (JSON) here.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Print download links for a stored manifest.
    List {
        #[arg(long)]
        manifest: PathBuf,
    },

    /// Fetch one archived artifact by relative path.
    Download {
        #[arg(long)]
        path: String,
        #[arg(long)]
        dest: PathBuf,
    },

    /// Bundle workspace files under a stash name.
    Stash {
        #[arg(long)]
        name: String,
        #[arg(long)]
        workspace: PathBuf,
        #[arg(long = "include")]
        includes: Vec<String>,
        #[arg(long = "exclude")]
        excludes: Vec<String>,
        #[arg(long)]
        allow_empty: bool,
    },

    /// Restore a stash into the workspace.
    Unstash {
        #[arg(long)]
        name: String,
        #[arg(long)]
        workspace: PathBuf,
        /// Replay mode: read the stash of this earlier build instead.
        #[arg(long)]
        from_build: Option<u64>,
    },

    /// Delete stashes of the build.
    ClearStash {
        #[arg(long = "name", required = true)]
        names: Vec<String>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_vec_pretty(manifest)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write manifest {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(Some(&cli.config)).with_context(|| format!("Failed to load config {}", cli.config))?;
    config.validate()?;
    init_tracing(&config.logging);

    let build = BuildIdentity::new(cli.job.clone(), cli.build)?;
    let store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new(
        &config.repository,
        RetryPolicy::from(&config.retry),
    )?);
    let archive = Arc::new(ArchiveCoordinator::new(store.clone(), config.repository.clone()));
    let stash = Arc::new(StashCoordinator::new(store, config.repository.clone()));

    info!(build = %build, node = %cli.node, "Configuration loaded");

    match cli.cmd {
        Command::Archive {
            workspace,
            includes,
            excludes,
            manifest,
        } => {
            let workspace = NodeWorkspace::new(&cli.node, workspace);
            let (stored, failure) = match archive.archive_workspace(&build, &workspace, &includes, &excludes).await {
                Ok(stored) => (stored, None),
                Err(ArtifactError::PartialArchive(report)) => {
                    let message = report.to_string();
                    (report.manifest, Some(message))
                }
                Err(e) => return Err(e.into()),
            };
            // Successfully stored files stay listed even when the step fails.
            if let Some(path) = &manifest {
                write_manifest(path, &stored).await?;
            }
            println!("{}", serde_json::to_string_pretty(&archive.download_links(&stored))?);
            if let Some(message) = failure {
                error!(build = %build, error = %message, "Archive step failed");
                anyhow::bail!(message);
            }
        }
        Command::List { manifest } => {
            let data = tokio::fs::read(&manifest)
                .await
                .with_context(|| format!("Failed to read manifest {}", manifest.display()))?;
            let manifest: Manifest = serde_json::from_slice(&data)?;
            println!("{}", serde_json::to_string_pretty(&archive.download_links(&manifest))?);
        }
        Command::Download { path, dest } => {
            let bytes = archive.download(&build, &path, &dest).await?;
            println!("{} ({} bytes)", dest.display(), bytes);
        }
        Command::Stash {
            name,
            workspace,
            includes,
            excludes,
            allow_empty,
        } => {
            let workspace = NodeWorkspace::new(&cli.node, workspace);
            let options = StashOptions { allow_empty };
            stash
                .stash_matching(&build, &name, &workspace, &includes, &excludes, &options)
                .await?;
        }
        Command::Unstash {
            name,
            workspace,
            from_build,
        } => {
            let workspace = NodeWorkspace::create(&cli.node, workspace).await?;
            let restored = match from_build {
                Some(original_number) => {
                    let original = BuildIdentity::new(cli.job.clone(), original_number)?;
                    let ctx = new_build_context(&original, build.build_number())?;
                    let replay = ReplayAdapter::new(archive.clone(), stash.clone());
                    replay.unstash(&ctx, &name, &workspace, StashSource::Original).await?
                }
                None => stash.unstash(&build, &name, &workspace).await?,
            };
            for path in restored {
                println!("{}", path);
            }
        }
        Command::ClearStash { names } => {
            let removed = stash.clear_all(&build, &names).await?;
            if removed < names.len() {
                warn!(requested = names.len(), removed, "Some stashes were already absent");
            }
        }
    }

    Ok(())
}
