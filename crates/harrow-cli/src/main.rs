use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use harrow_client::{ApiDescriptor, CookieSigner, JsonApiAdapter, ReqwestTransport};
use harrow_core::account::{Account, AccountStatus, AccountUpdate, NewAccount};
use harrow_core::checkpoint::{Checkpoint, CheckpointFilter, CheckpointStatus};
use harrow_core::checkpoint_store::CheckpointStore;
use harrow_core::config::CrawlerConfig;
use harrow_core::error::AppError;
use harrow_core::executor::ResilientExecutor;
use harrow_core::pipeline::{
    CrawlReport, CrawlRequest, CrawlTarget, FetchPipeline, TracingPipelineReporter,
};
use harrow_core::rate_limit::TokenBucket;
use harrow_core::rotator::AccountRotator;
use harrow_core::snapshot::FileSnapshotStore;
use harrow_core::traits::{AccountStore, ItemSink, NullSink};
use harrow_db::{AccountRepository, CheckpointRepository, Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "harrow", version, about = "Resumable, account-rotating API crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run (or resume) a crawl task
    Crawl {
        /// Path to the platform API descriptor (JSON)
        #[arg(short, long, env = "HARROW_API_DESCRIPTOR")]
        api: PathBuf,

        /// Group checkpoints under a project name
        #[arg(long)]
        project: Option<String>,

        /// Skip comment fetching
        #[arg(long, default_value_t = false)]
        no_comments: bool,

        /// Do not persist fetched items and comments
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[command(subcommand)]
        target: TargetCommand,
    },

    /// Inspect and manage crawl checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Manage platform accounts
    Accounts {
        #[command(subcommand)]
        action: AccountAction,
    },
}

#[derive(Subcommand)]
enum TargetCommand {
    /// Walk search results for each keyword
    Search {
        /// Comma-separated keywords
        #[arg(short, long, value_delimiter = ',', required = true)]
        keywords: Vec<String>,
    },
    /// Fetch specific items by id
    Detail {
        /// Comma-separated item ids
        #[arg(short, long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
    },
    /// Walk each creator's posts
    Creator {
        /// Comma-separated creator ids
        #[arg(short, long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
    },
    /// Walk the recommendation feed
    Feed,
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List checkpoints, most recently updated first
    List {
        #[arg(short, long)]
        platform: Option<String>,
        /// running, paused, completed or failed
        #[arg(short, long)]
        status: Option<CheckpointStatus>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one checkpoint as JSON
    Get { id: Uuid },
    /// Delete a checkpoint, its ledger rows and its snapshot
    Delete { id: Uuid },
    /// Pause a running checkpoint
    Pause { id: Uuid },
    /// Delete checkpoints not updated in the last N days
    Cleanup {
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    /// List accounts
    List {
        #[arg(short, long)]
        platform: Option<String>,
        /// active, cooling, banned, disabled or expired
        #[arg(short, long)]
        status: Option<AccountStatus>,
    },
    /// Show one account as JSON
    Get { id: Uuid },
    /// Register a new account
    Add {
        #[arg(short, long)]
        platform: String,
        /// Credential (cookie string); reads HARROW_CREDENTIAL if omitted
        #[arg(short, long, env = "HARROW_CREDENTIAL")]
        credential: String,
        #[arg(short, long)]
        notes: Option<String>,
    },
    /// Replace an account's credential or notes
    Update {
        id: Uuid,
        #[arg(short, long)]
        credential: Option<String>,
        #[arg(short, long)]
        notes: Option<String>,
    },
    /// Delete an account
    Delete { id: Uuid },
    /// Put an account back into rotation
    Activate { id: Uuid },
    /// Take an account out of rotation
    Disable { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harrow=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = connect_db().await?;

    match cli.command {
        Commands::Crawl {
            api,
            project,
            no_comments,
            dry_run,
            target,
        } => {
            let target = match target {
                TargetCommand::Search { keywords } => CrawlTarget::Search { keywords },
                TargetCommand::Detail { ids } => CrawlTarget::Detail { item_ids: ids },
                TargetCommand::Creator { ids } => CrawlTarget::Creator { creator_ids: ids },
                TargetCommand::Feed => CrawlTarget::Feed,
            };
            let options = CrawlOptions {
                api,
                project,
                no_comments,
            };
            let report = if dry_run {
                cmd_crawl(&db, options, target, NullSink).await?
            } else {
                cmd_crawl(&db, options, target, db.content_repo()).await?
            };
            print_report(&report);
        }
        Commands::Checkpoints { action } => cmd_checkpoints(&db, action).await?,
        Commands::Accounts { action } => cmd_accounts(&db, action).await?,
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and run migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

fn checkpoint_store(
    db: &Database,
    config: &CrawlerConfig,
) -> CheckpointStore<CheckpointRepository, FileSnapshotStore> {
    CheckpointStore::new(
        db.checkpoint_repo(),
        FileSnapshotStore::new(config.snapshot_dir.clone()),
    )
}

struct CrawlOptions {
    api: PathBuf,
    project: Option<String>,
    no_comments: bool,
}

async fn cmd_crawl<K: ItemSink>(
    db: &Database,
    options: CrawlOptions,
    target: CrawlTarget,
    sink: K,
) -> Result<CrawlReport> {
    let mut config = CrawlerConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    if options.no_comments {
        config.pipeline.fetch_comments = false;
    }

    let descriptor = ApiDescriptor::from_file(&options.api).map_err(|e| anyhow::anyhow!(e))?;
    let platform = descriptor.platform.clone();
    let adapter = JsonApiAdapter::new(descriptor);

    let rotator: AccountRotator<AccountRepository> =
        AccountRotator::new(db.account_repo(), config.rotation.clone());
    let loaded = rotator
        .load(&platform)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    let stats = rotator.stats(&platform).await;
    tracing::info!(
        platform = %platform,
        accounts = loaded,
        active = stats.count(AccountStatus::Active),
        "Loaded accounts"
    );

    let transport = ReqwestTransport::with_timeout(config.executor.request_timeout)
        .map_err(|e| anyhow::anyhow!(e))?;
    let bucket = TokenBucket::new(config.rate_limit.clone()).map_err(|e| anyhow::anyhow!(e))?;
    let executor = ResilientExecutor::new(
        platform.clone(),
        CookieSigner::new(),
        transport,
        bucket,
        rotator,
        config.executor.clone(),
    );

    let pipeline = FetchPipeline::new(
        Arc::new(adapter),
        Arc::new(executor),
        checkpoint_store(db, &config),
        sink,
        config.pipeline.clone(),
    );

    let mut request = CrawlRequest::new(platform, target);
    if let Some(project) = options.project {
        request = request.with_project(project);
    }

    pipeline
        .run(&request, &TracingPipelineReporter)
        .await
        .map_err(|e| anyhow::anyhow!(e))
}

fn print_report(report: &CrawlReport) {
    println!("Checkpoint {} — {}", report.checkpoint_id, report.status);
    println!("  items fetched:    {}", report.items_fetched);
    println!("  comments fetched: {}", report.comments_fetched);
    println!("  items skipped:    {}", report.items_skipped);
    println!("  items failed:     {}", report.items_failed);
    println!("  comments failed:  {}", report.comments_failed);
    println!("  scopes aborted:   {}", report.scopes_aborted);
    if let Some(error) = &report.error_message {
        println!("  last error:       {error}");
    }
}

async fn cmd_checkpoints(db: &Database, action: CheckpointAction) -> Result<()> {
    let config = CrawlerConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let store = checkpoint_store(db, &config);

    match action {
        CheckpointAction::List {
            platform,
            status,
            limit,
        } => {
            let filter = CheckpointFilter {
                platform,
                status,
                limit: Some(limit),
            };
            let checkpoints = store.list(&filter).await.map_err(|e| anyhow::anyhow!(e))?;
            if checkpoints.is_empty() {
                println!("No checkpoints found");
                return Ok(());
            }
            for checkpoint in &checkpoints {
                print_checkpoint_line(checkpoint);
            }
            println!("\nTotal: {} checkpoints", checkpoints.len());
        }
        CheckpointAction::Get { id } => match store.get(id).await.map_err(|e| anyhow::anyhow!(e))? {
            Some(checkpoint) => {
                let ledger = store
                    .ledger_count(id)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
                println!("{}", serde_json::to_string_pretty(&checkpoint)?);
                println!("Ledger entries: {ledger}");
            }
            None => println!("Checkpoint {id} not found"),
        },
        CheckpointAction::Delete { id } => {
            if store.delete(id).await.map_err(|e| anyhow::anyhow!(e))? {
                println!("Deleted checkpoint {id}");
            } else {
                println!("Checkpoint {id} not found");
            }
        }
        CheckpointAction::Pause { id } => match store.pause(id).await {
            Ok(checkpoint) => println!("Checkpoint {} is {}", id, checkpoint.status),
            Err(AppError::NotFound(_)) => println!("Checkpoint {id} not found"),
            Err(e) => return Err(anyhow::anyhow!(e)),
        },
        CheckpointAction::Cleanup { days } => {
            let removed = store
                .cleanup_older_than(days)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("Removed {removed} checkpoints older than {days} days");
        }
    }

    Ok(())
}

fn print_checkpoint_line(checkpoint: &Checkpoint) {
    println!(
        "  {} [{}] {} {} {} — keyword {} page {}, {} notes, {} comments (updated {})",
        checkpoint.task_id,
        checkpoint.status,
        checkpoint.platform,
        checkpoint.mode,
        checkpoint.scope_key.as_deref().unwrap_or("-"),
        checkpoint.current_keyword_index,
        checkpoint.current_page,
        checkpoint.notes_fetched,
        checkpoint.comments_fetched,
        checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
}

async fn cmd_accounts(db: &Database, action: AccountAction) -> Result<()> {
    let repo = db.account_repo();
    let config = CrawlerConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let rotator = AccountRotator::new(repo.clone(), config.rotation);

    match action {
        AccountAction::List { platform, status } => {
            let accounts = repo
                .list_accounts(platform.as_deref(), status)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            if accounts.is_empty() {
                println!("No accounts found");
                return Ok(());
            }
            for account in &accounts {
                print_account_line(account);
            }
            if let Some(platform) = platform {
                rotator
                    .load(&platform)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
                let stats = rotator.stats(&platform).await;
                println!(
                    "\n{platform}: {} accounts ({} active, {} cooling, {} banned, {} disabled, {} expired); {} requests, {} successes, {} errors",
                    stats.total,
                    stats.count(AccountStatus::Active),
                    stats.count(AccountStatus::Cooling),
                    stats.count(AccountStatus::Banned),
                    stats.count(AccountStatus::Disabled),
                    stats.count(AccountStatus::Expired),
                    stats.requests,
                    stats.successes,
                    stats.errors,
                );
            } else {
                println!("\nTotal: {} accounts", accounts.len());
            }
        }
        AccountAction::Get { id } => {
            match repo.get_account(id).await.map_err(|e| anyhow::anyhow!(e))? {
                Some(account) => println!("{}", serde_json::to_string_pretty(&redacted(account))?),
                None => println!("Account {id} not found"),
            }
        }
        AccountAction::Add {
            platform,
            credential,
            notes,
        } => {
            let mut request = NewAccount::new(platform, credential);
            if let Some(notes) = notes {
                request = request.with_notes(notes);
            }
            let account = rotator
                .add_account(request)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("Added account {} for {}", account.id, account.platform);
        }
        AccountAction::Update {
            id,
            credential,
            notes,
        } => {
            let update = AccountUpdate {
                credential,
                notes,
                metadata: None,
            };
            report_account(id, "Updated", rotator.update(id, update).await)?;
        }
        AccountAction::Delete { id } => {
            if rotator.remove(id).await.map_err(|e| anyhow::anyhow!(e))? {
                println!("Deleted account {id}");
            } else {
                println!("Account {id} not found");
            }
        }
        AccountAction::Activate { id } => {
            report_account(id, "Activated", rotator.activate(id).await)?;
        }
        AccountAction::Disable { id } => {
            report_account(id, "Disabled", rotator.disable(id).await)?;
        }
    }

    Ok(())
}

fn report_account(
    id: Uuid,
    verb: &str,
    result: Result<Option<Account>, AppError>,
) -> Result<()> {
    match result.map_err(|e| anyhow::anyhow!(e))? {
        Some(account) => println!("{verb} account {id} ({})", account.status),
        None => println!("Account {id} not found"),
    }
    Ok(())
}

fn print_account_line(account: &Account) {
    println!(
        "  {} [{}] {} — {} requests, {} ok, {} errors{}",
        account.id,
        account.status,
        account.platform,
        account.request_count,
        account.success_count,
        account.error_count,
        account
            .notes
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default(),
    );
}

/// Credentials never go to stdout.
fn redacted(mut account: Account) -> Account {
    account.credential = "***".to_string();
    account
}
