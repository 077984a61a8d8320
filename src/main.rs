//! # repolens CLI
//!
//! ```bash
//! repolens --config ./config/repolens.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repolens init` | Create the SQLite database and run schema migrations |
//! | `repolens ingest <url>` | Clone and fully (re)index a repository |
//! | `repolens sync <url>` | Apply a change-set to an indexed repository |
//! | `repolens ready <url>` | Wait until a repository is indexed, ingesting on demand |
//! | `repolens context <url>` | Print the related-code bundle for a merge request or commit |
//! | `repolens search <url> "<query>"` | Nearest entries to a free-text query |
//! | `repolens status <url>` | Entry count for a repository |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repolens::commands::{self, ChangeSource, DiffSource};
use repolens::{config, migrate};

/// repolens: a semantic index of git repositories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/repolens.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "repolens", version, about = "Semantic vector index for git repositories")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/repolens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Clone a repository and replace its index entries.
    Ingest {
        /// Clone URL of the repository.
        url: String,

        /// Username for authenticated clones.
        #[arg(long)]
        username: Option<String>,

        /// Environment variable holding the access token.
        #[arg(long)]
        token_env: Option<String>,

        /// Branch to index instead of the remote default.
        #[arg(long)]
        branch: Option<String>,

        /// Job identifier (generated when omitted).
        #[arg(long)]
        job_id: Option<String>,
    },

    /// Apply a change-set to an indexed repository.
    ///
    /// Changed paths come either from `--updated`/`--deleted` or from a
    /// merge request's diff.
    Sync {
        /// Clone URL of the repository (the key its entries are stored under).
        url: String,

        /// Hosting project path or numeric id, e.g. `group/service`.
        #[arg(long)]
        project: String,

        /// Branch or commit the updated content is read from.
        #[arg(long = "ref", default_value = "main")]
        git_ref: String,

        /// Paths added or modified.
        #[arg(long, num_args = 1..)]
        updated: Vec<String>,

        /// Paths removed.
        #[arg(long, num_args = 1..)]
        deleted: Vec<String>,

        /// Take the change-set from this merge request instead.
        #[arg(long, conflicts_with_all = ["updated", "deleted"])]
        merge_request: Option<u64>,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        token_env: Option<String>,
    },

    /// Block until the repository has index entries.
    Ready {
        url: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        token_env: Option<String>,

        #[arg(long)]
        branch: Option<String>,
    },

    /// Print the related-code bundle for a change.
    Context {
        /// Clone URL of the indexed repository.
        url: String,

        /// Hosting project path or numeric id.
        #[arg(long)]
        project: String,

        /// Merge request IID.
        #[arg(long, required_unless_present = "commit", conflicts_with = "commit")]
        merge_request: Option<u64>,

        /// Commit SHA.
        #[arg(long)]
        commit: Option<String>,
    },

    /// Nearest entries of a repository to a free-text query.
    Search {
        url: String,

        query: String,

        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Show how many entries a repository has.
    Status { url: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            url,
            username,
            token_env,
            branch,
            job_id,
        } => {
            let repo = commands::repository_ref(&cfg, &url, username, token_env.as_deref(), branch);
            commands::run_ingest(&cfg, repo, job_id).await?;
        }
        Commands::Sync {
            url,
            project,
            git_ref,
            updated,
            deleted,
            merge_request,
            username,
            token_env,
        } => {
            let repo = commands::repository_ref(&cfg, &url, username, token_env.as_deref(), None);
            let changes = match merge_request {
                Some(iid) => ChangeSource::MergeRequest(iid),
                None => ChangeSource::Explicit { updated, deleted },
            };
            commands::run_sync(&cfg, repo, project, git_ref, changes).await?;
        }
        Commands::Ready {
            url,
            username,
            token_env,
            branch,
        } => {
            let repo = commands::repository_ref(&cfg, &url, username, token_env.as_deref(), branch);
            commands::run_ready(&cfg, repo).await?;
        }
        Commands::Context {
            url,
            project,
            merge_request,
            commit,
        } => {
            let source = match (merge_request, commit) {
                (Some(iid), _) => DiffSource::MergeRequest(iid),
                (None, Some(sha)) => DiffSource::Commit(sha),
                (None, None) => anyhow::bail!("Either --merge-request or --commit is required"),
            };
            commands::run_context(&cfg, &url, &project, source).await?;
        }
        Commands::Search { url, query, limit } => {
            commands::run_search(&cfg, &url, &query, limit).await?;
        }
        Commands::Status { url } => {
            commands::run_status(&cfg, &url).await?;
        }
    }

    Ok(())
}
