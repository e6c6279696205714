//! github-importer CLI
//!
//! Usage:
//!   github-importer repos
//!   github-importer import --repo octocat/hello-world --file milestones.json
//!   github-importer export --repo octocat/hello-world --file export.json
//!   github-importer clear --repo octocat/hello-world
//!   github-importer auth url
//!   github-importer auth exchange --code <code>

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use github_importer::auth::{CredentialProvider, DEFAULT_TOKEN_FILE};
use github_importer::config::{DEFAULT_BASE_URL, DEFAULT_DELETE_DELAY};
use github_importer::engine::OperationHandle;
use github_importer::observability::{LogConfig, LogFormat};
use github_importer::{
    BulkEngine, BulkRequest, FileTokenStorage, GitHubApi, GitHubClient, OAuthAppConfig,
    OAuthCredentialProvider, ProgressEvent, RepoTarget, StaticCredentialProvider, TokenStorage,
};

#[derive(Parser)]
#[command(name = "github-importer", version)]
#[command(about = "Import, export and clear GitHub milestones and issues")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Personal access token. Without it the stored OAuth tokens are used.
    #[arg(long, env = "GITHUB_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// File holding OAuth tokens
    #[arg(long, env = "GITHUB_IMPORTER_TOKEN_FILE", default_value = DEFAULT_TOKEN_FILE, global = true)]
    token_file: PathBuf,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_BASE_URL, global = true)]
    base_url: String,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format: pretty, json or compact
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// List repositories of the authenticated user
    Repos,
    /// Show the authenticated user
    Whoami,
    /// Create milestones and issues from a JSON file
    Import {
        /// Repository as owner/name
        #[arg(long, short)]
        repo: RepoTarget,
        /// Document to import
        #[arg(long, short)]
        file: PathBuf,
    },
    /// Write milestones, issues and comments to a JSON file
    Export {
        /// Repository as owner/name
        #[arg(long, short)]
        repo: RepoTarget,
        /// Output file
        #[arg(long, short)]
        file: PathBuf,
    },
    /// Delete every issue and milestone of a repository
    Clear {
        /// Repository as owner/name
        #[arg(long, short)]
        repo: RepoTarget,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
        /// Pause between issue deletions, in milliseconds
        #[arg(long, default_value_t = DEFAULT_DELETE_DELAY.as_millis() as u64)]
        delay_ms: u64,
    },
    /// OAuth web flow
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Print the authorization page URL
    Url {
        /// Opaque value echoed back to the redirect URI
        #[arg(long)]
        state: Option<String>,
    },
    /// Exchange an authorization code and store the tokens
    Exchange {
        /// Code from the redirect
        #[arg(long)]
        code: String,
    },
    /// Forget stored tokens
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    LogConfig::default()
        .with_level(cli.log_level.clone())
        .with_format(cli.log_format)
        .init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    match cli.command {
        Commands::Auth { ref command } => run_auth(&cli, command).await,
        Commands::Repos => {
            let client = build_client(&cli, DEFAULT_DELETE_DELAY).await?;
            for repo in client.list_repositories().await? {
                println!("{}", repo.full_name);
            }
            Ok(())
        }
        Commands::Whoami => {
            let client = build_client(&cli, DEFAULT_DELETE_DELAY).await?;
            let user = client.users().get_authenticated().await?;
            let budget = client.rate_limit_state().await;
            match (budget.remaining, budget.limit) {
                (Some(remaining), Some(limit)) => {
                    println!("{} ({}/{} requests left)", user.login, remaining, limit)
                }
                _ => println!("{}", user.login),
            }
            Ok(())
        }
        Commands::Import { ref repo, ref file } => {
            let client = build_client(&cli, DEFAULT_DELETE_DELAY).await?;
            run(client, BulkRequest::Import {
                target: repo.clone(),
                path: file.clone(),
            })
            .await
        }
        Commands::Export { ref repo, ref file } => {
            let client = build_client(&cli, DEFAULT_DELETE_DELAY).await?;
            run(client, BulkRequest::Export {
                target: repo.clone(),
                path: file.clone(),
            })
            .await
        }
        Commands::Clear {
            ref repo,
            yes,
            delay_ms,
        } => {
            let confirmed = yes || confirm_clear(repo)?;
            let client = build_client(&cli, Duration::from_millis(delay_ms)).await?;
            run(client, BulkRequest::Clear {
                target: repo.clone(),
                confirmed,
            })
            .await
        }
    }
}

async fn build_client(cli: &Cli, delete_delay: Duration) -> Result<GitHubClient> {
    let credentials: Arc<dyn CredentialProvider> = match &cli.token {
        Some(token) => Arc::new(StaticCredentialProvider::new(token.clone())),
        None => {
            let provider = oauth_provider(cli)?;
            if !provider.load_stored().await? {
                bail!(
                    "not authorized: set GITHUB_TOKEN or run `github-importer auth url` and `auth exchange`"
                );
            }
            Arc::new(provider)
        }
    };

    let client = GitHubClient::builder()
        .base_url(cli.base_url.clone())
        .credentials(credentials)
        .delete_delay(delete_delay)
        .build()?;
    Ok(client)
}

fn oauth_provider(cli: &Cli) -> Result<OAuthCredentialProvider> {
    let app = OAuthAppConfig::from_env().context("OAuth app is not configured")?;
    let storage = Arc::new(FileTokenStorage::new(&cli.token_file));
    Ok(OAuthCredentialProvider::new(app, storage)?)
}

async fn run_auth(cli: &Cli, command: &AuthCommands) -> Result<()> {
    match command {
        AuthCommands::Url { state } => {
            let provider = oauth_provider(cli)?;
            println!("{}", provider.authorization_url(state.as_deref())?);
        }
        AuthCommands::Exchange { code } => {
            let provider = oauth_provider(cli)?;
            let completion = provider.completion().await;
            provider.exchange_code(code).await?;
            if let Some(completion) = completion {
                completion.wait().await?;
            }
            println!("Authorized; tokens stored in {}", cli.token_file.display());
        }
        AuthCommands::Logout => {
            FileTokenStorage::new(&cli.token_file).clear().await?;
            println!("Removed {}", cli.token_file.display());
        }
    }
    Ok(())
}

fn confirm_clear(target: &RepoTarget) -> Result<bool> {
    print!(
        "This deletes every issue and milestone in {}. Type the repository name to confirm: ",
        target
    );
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim();
    Ok(answer == target.to_string() || answer == target.repo)
}

async fn run(client: GitHubClient, request: BulkRequest) -> Result<()> {
    let delete_delay = client.config().bulk.delete_delay;
    let metrics = client.metrics();
    let engine = Arc::new(BulkEngine::new(Arc::new(client)).with_delete_delay(delete_delay));
    let (handle, mut events) = engine.spawn(request)?;
    drain(&handle, &mut events).await;

    let result = handle.join().await;
    tracing::info!(metrics = %metrics.snapshot(), "GitHub requests");
    let summary = result?;
    println!("{}", summary);
    for failure in summary.failures() {
        eprintln!("  failed: {}", failure);
    }
    Ok(())
}

async fn drain(
    handle: &OperationHandle,
    events: &mut github_importer::engine::ProgressReceiver,
) {
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!("Cancelling after the current item...");
                handle.cancel();
            }
        }
    }
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Started { kind, target, .. } => println!("Starting {} on {}", kind, target),
        ProgressEvent::MilestoneCreated { title, number } => {
            println!("Created milestone #{} {}", number, title)
        }
        ProgressEvent::IssueCreated { title, number } => println!("  created issue #{} {}", number, title),
        ProgressEvent::MilestoneExported { title, issues } => {
            println!("Exported milestone {} ({} issues)", title, issues)
        }
        ProgressEvent::IssueDeleted { number } => println!("  deleted issue #{}", number),
        ProgressEvent::MilestoneDeleted { title, number } => {
            println!("Deleted milestone #{} {}", number, title)
        }
        ProgressEvent::ItemFailed(failure) => eprintln!("  failed: {}", failure),
        _ => {}
    }
}
