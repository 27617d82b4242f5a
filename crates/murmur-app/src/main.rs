//! Murmur application binary - composition root.
//!
//! Ties the murmur crates into a single executable:
//! 1. Load configuration from TOML and the environment
//! 2. Connect the durable store (Redis, or in-process when disabled)
//! 3. Start the scheduler (periodic reload, cron engine, one-shot poller)
//! 4. Build the memory pipeline and feed it inbound messages from stdin

mod cli;
mod inbound;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use murmur_core::clock::{SharedClock, SystemClock};
use murmur_core::config::MurmurConfig;
use murmur_core::types::Destination;
use murmur_memory::{
    CareReplyComposer, CompletionService, GroupSwitches, HttpCompletionService, MemoryBackends,
    MemoryPipeline, PipelineOutcome, RetrievalComposer, RetrievalFilter,
};
use murmur_scheduler::{
    FollowUpComposer, LogNotifier, Notifier, Scheduler, ToolReply, WebhookNotifier,
};
use murmur_storage::{
    Database, GroupSettingsRepository, MemoryStore, RedisStore, SharedStore, SqliteMessageStore,
};
use murmur_vector::{
    DynEmbeddingService, HttpEmbeddingService, InMemoryNamespaces, MockEmbedding,
    PineconeNamespaces, VectorNamespaces,
};

use cli::{CliArgs, Command, Switch, TaskAction};

type BoxError = Box<dyn std::error::Error>;

/// How long shutdown waits for in-flight messages to finish routing.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

async fn open_store(config: &MurmurConfig) -> Result<SharedStore, BoxError> {
    if !config.redis.enabled {
        tracing::warn!("Redis disabled; tasks and temporary memories will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = RedisStore::connect(&config.redis).await?;
    Ok(Arc::new(store))
}

fn open_database(config: &MurmurConfig) -> Result<Arc<Database>, BoxError> {
    let data_dir = resolve_data_dir(&config.general.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("murmur.db");
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "Message archive opened");
    Ok(Arc::new(db))
}

fn build_notifier(config: &MurmurConfig) -> Result<Arc<dyn Notifier>, BoxError> {
    match config.notifier.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => {
            tracing::info!(url, "Delivering notifications to webhook");
            Ok(Arc::new(WebhookNotifier::new(url)?))
        }
        None => {
            tracing::info!("No webhook configured; notifications will be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

fn build_embedder(config: &MurmurConfig) -> Result<Arc<dyn DynEmbeddingService>, BoxError> {
    match config.embedding.backend.as_str() {
        "mock" => {
            tracing::warn!("Using mock embeddings; recall quality is meaningless");
            Ok(Arc::new(MockEmbedding::with_dimensions(config.embedding.dimensions)))
        }
        _ => Ok(Arc::new(HttpEmbeddingService::from_config(
            &config.embedding,
            config.llm.proxy.as_deref(),
        )?)),
    }
}

fn build_namespaces(config: &MurmurConfig) -> Result<Arc<dyn VectorNamespaces>, BoxError> {
    match config.vector.backend.as_str() {
        "pinecone" => Ok(Arc::new(PineconeNamespaces::new(
            &config.vector.host,
            config.vector.api_key.clone(),
        )?)),
        _ => {
            tracing::warn!("Using in-process vector index; long-term memories will not survive a restart");
            Ok(Arc::new(InMemoryNamespaces::new()))
        }
    }
}

/// Everything `serve` and `recall` share.
struct Services {
    scheduler: Scheduler,
    backends: MemoryBackends,
    db: Arc<Database>,
    classifier: Arc<dyn CompletionService>,
}

fn build_services(config: &MurmurConfig, store: SharedStore) -> Result<Services, BoxError> {
    let clock: SharedClock = Arc::new(SystemClock);
    let db = open_database(config)?;

    let chat = Arc::new(HttpCompletionService::from_config(&config.llm, &config.llm.model)?);
    let classifier: Arc<dyn CompletionService> = Arc::new(HttpCompletionService::from_config(
        &config.llm,
        &config.llm.classifier_model,
    )?);

    let composer: Arc<dyn FollowUpComposer> = Arc::new(CareReplyComposer::new(chat));
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        build_notifier(config)?,
        Some(composer),
        Arc::clone(&clock),
        &config.scheduler,
    );

    let backends = MemoryBackends {
        store,
        embedder: build_embedder(config)?,
        namespaces: build_namespaces(config)?,
        messages: Arc::new(SqliteMessageStore::new(Arc::clone(&db))),
        tasks: scheduler.tasks(),
        clock,
    };

    Ok(Services {
        scheduler,
        backends,
        db,
        classifier,
    })
}

async fn serve(config: &MurmurConfig, store: SharedStore) -> Result<(), BoxError> {
    let services = build_services(config, store)?;

    if let Err(e) = services.scheduler.init().await {
        tracing::warn!(error = %e, "Periodic tasks not reloaded; scheduler loops are running");
    }

    let pipeline = Arc::new(MemoryPipeline::new(
        services.backends.clone(),
        Arc::new(GroupSettingsRepository::new(Arc::clone(&services.db))),
        Arc::clone(&services.classifier),
        &config.memory,
    ));

    let mut in_flight: Vec<JoinHandle<PipelineOutcome>> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tracing::info!("Reading inbound messages from stdin");
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match inbound::parse_line(&line) {
                    Ok(Some(message)) => {
                        in_flight.retain(|handle| !handle.is_finished());
                        in_flight.push(pipeline.classify_and_route(message));
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed inbound line"),
                },
                Ok(None) => {
                    tracing::info!("Input closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    }

    let drain = async {
        for handle in in_flight {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("Gave up waiting for in-flight messages");
    }
    services.scheduler.shutdown().await;
    tracing::info!("Murmur stopped");
    Ok(())
}

async fn recall(
    config: &MurmurConfig,
    store: SharedStore,
    query: &str,
    filter: RetrievalFilter,
) -> Result<(), BoxError> {
    let services = build_services(config, store)?;
    let composer = RetrievalComposer::new(services.backends, config.retrieval.clone());
    let retrieval = composer.retrieve(query, filter).await;
    println!("{}", serde_json::to_string_pretty(&retrieval)?);
    Ok(())
}

async fn run_tasks(
    config: &MurmurConfig,
    store: SharedStore,
    action: TaskAction,
) -> Result<(), BoxError> {
    let scheduler = Scheduler::new(
        store,
        Arc::new(LogNotifier),
        None,
        Arc::new(SystemClock),
        &config.scheduler,
    );
    let reminders = scheduler.reminders();

    let reply = match action {
        TaskAction::List { group, user } => {
            let destination = Destination::new(group, user.unwrap_or(0));
            reminders.list(destination, user.is_none()).await
        }
        TaskAction::Add {
            group,
            user,
            content,
            delay,
            cron,
        } => {
            let args = match (delay, cron) {
                (_, Some(cron)) => json!({"type": "periodic", "content": content, "cron_expr": cron}),
                (delay, None) => json!({"type": "once", "content": content, "delay_seconds": delay}),
            };
            reminders.set(&args, Destination::new(group, user)).await
        }
        TaskAction::Remove { id } => reminders.cancel(&json!({ "id": id })).await,
    };

    report(reply)
}

/// Apply any requested switch changes, then print the group's current state.
fn run_groups(
    config: &MurmurConfig,
    group: i64,
    active: Option<Switch>,
    rag: Option<Switch>,
) -> Result<(), BoxError> {
    let db = open_database(config)?;
    let switches = GroupSwitches::new(Arc::new(GroupSettingsRepository::new(db)));

    if let Some(active) = active {
        report(switches.set_active(group, active.is_on()))?;
    }
    if let Some(rag) = rag {
        report(switches.set_rag_enabled(group, rag.is_on()))?;
    }
    report(switches.bot_status(group))?;
    report(switches.rag_status(group))
}

fn report(reply: ToolReply) -> Result<(), BoxError> {
    println!("{}", reply.message);
    if reply.success {
        Ok(())
    } else {
        Err(reply.message.into())
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = MurmurConfig::load_or_default(&config_file);
    config.apply_env_overrides();

    // Tracing.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!(config = %config_file.display(), "Starting Murmur v{}", env!("CARGO_PKG_VERSION"));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, open_store(&config).await?).await,
        Command::Tasks { action } => run_tasks(&config, open_store(&config).await?, action).await,
        Command::Recall { query, group, user } => {
            let filter = RetrievalFilter {
                group_id: group,
                user_id: user,
            };
            recall(&config, open_store(&config).await?, &query, filter).await
        }
        Command::Groups { group, active, rag } => run_groups(&config, group, active, rag),
    }
}
