//! Process entry point (§1 overview): wires every store, the LLM gateway,
//! the tool registry, and the OneBot ingress into a single running engine,
//! then drives the Proactive Scheduler, the Dream Consolidator, and the
//! periodic vector-cleanup ticker as independent cancellable loops until
//! shutdown. Grounded directly on `mneme_cli::main`: the CLI
//! arg shape, the tracing-subscriber bring-up, and the sequential
//! component-construction order (memory before persona before the LLM
//! client before the coordinator) all follow it. The `tokio::select!` merge
//! loop is simpler here since this engine has one wire transport instead of
//! the stdin + OneBot + MCP + agent-action channel mix `mneme_cli` merges.

mod classifier;
mod persona_seed;
mod summarizer;

use classifier::HeuristicVisualClassifier;
use clap::Parser;
use nyx_core::config::EngineConfig;
use nyx_core::{SessionId, StartupError, UserId};
use nyx_ingress::{Debouncer, IngressSource};
use nyx_llm::{AnthropicProvider, LlmGateway, LlmProvider, MockProvider, OpenAiCompatProvider, RetryConfig};
use nyx_memory::{DreamConsolidator, EpisodicMemory, FastEmbedder, HashEmbedder, HistoryStore, PersonaRetriever, RelationshipStore};
use nyx_onebot::{InboundMessage, MessageKind, OneBotClient, OneBotSource, Segment};
use nyx_orchestrator::{
    GenerateImageTool, ImagePerception, InboundText, PipelineInput, PipelineOutcome, ProactiveScheduler, RunPythonAnalysisTool, SessionMeta,
    SessionOrchestrator, ToolRegistry, WebSearchTool,
};
use persona_seed::SeedPersona;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use summarizer::LlmDreamSummarizer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Nyx cognitive orchestration engine", long_about = None)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, default_value = "nyx.toml")]
    config: String,

    /// Data directory (overrides config file): sqlite db, history, caches.
    #[arg(long)]
    data_dir: Option<String>,

    /// Path to a persona seed JSON file (overrides config file default).
    #[arg(long)]
    persona: Option<String>,

    /// Model to use (overrides config file)
    #[arg(short, long)]
    model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Log file path (additional to stderr); defaults under the data dir's log directory.
    #[arg(long)]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = EngineConfig::load_or_default(&args.config);
    if let Some(ref model) = args.model {
        config.llm.model = model.clone();
    }
    if let Some(ref dir) = args.data_dir {
        config.data.data_dir = PathBuf::from(dir);
    }

    setup_tracing(&args, &config)?;

    std::fs::create_dir_all(&config.data.data_dir)?;
    std::fs::create_dir_all(config.data.data_dir.join("history"))?;
    std::fs::create_dir_all(config.data.data_dir.join("cache"))?;
    std::fs::create_dir_all(&config.data.log_dir)?;

    info!("Initializing Nyx...");

    // 1. Memory first: every other component reads from or writes to it.
    let db_path = config.data.data_dir.join("nyx.db");
    info!(path = %db_path.display(), "opening episodic/relationship/persona store");
    let pool = nyx_memory::open_pool(&db_path).await?;

    let embedder: Arc<dyn nyx_memory::Embedder> = match FastEmbedder::new() {
        Ok(e) => Arc::new(e),
        Err(e) => {
            warn!(error = %e, "fastembed unavailable, falling back to the deterministic hash embedder");
            Arc::new(HashEmbedder::new(384))
        }
    };

    let affect = nyx_affect::AffectStore::default();
    let relationships = Arc::new(RelationshipStore::new(pool.clone()).await?);
    let episodic = Arc::new(EpisodicMemory::new(pool.clone(), embedder.clone()).await?);
    let persona = Arc::new(PersonaRetriever::new(pool.clone(), embedder.clone()).await?);
    let history = Arc::new(HistoryStore::new(config.data.data_dir.join("history")));

    // 2. Persona: core persona text and extended tables are seeded once and
    // indexed into the persona retriever's SQL-backed cache.
    info!("loading seed persona");
    let seed = SeedPersona::load_or_default(args.persona.as_deref());
    seed.index_into(&persona).await?;

    // 3. LLM Gateway: provider chosen by config, then wrapped in the
    // cache/coalesce/concurrency-gate/retry gateway (§4.4).
    let provider: Arc<dyn LlmProvider> = build_provider(&config)?;
    let gateway = Arc::new(LlmGateway::new(
        provider,
        config.llm.cache_max_size,
        config.llm.max_concurrent,
        RetryConfig { max_retries: config.llm.max_retries, request_timeout: Duration::from_secs(config.llm.request_timeout_secs) },
    ));
    let cache_snapshot_path = config.data.data_dir.join("cache").join("llm.bin");
    if let Err(e) = gateway.cache().load_from_disk(&cache_snapshot_path) {
        warn!(error = %e, "no usable llm cache snapshot on disk, starting cold");
    }

    // 4. Tool Executor (§4.10): each tool registers only if its endpoint is
    // configured, so an unconfigured tool is simply absent from the agent's
    // tool list rather than failing at call time.
    let mut tool_registry = ToolRegistry::new();
    if let Some(endpoint) = &config.tools.web_search_endpoint {
        tool_registry.register(Arc::new(WebSearchTool::new(endpoint.clone(), config.tools.web_search_api_key.clone())));
    }
    if let Some(endpoint) = &config.tools.image_gen_endpoint {
        tool_registry.register(Arc::new(GenerateImageTool::new(endpoint.clone(), config.tools.image_gen_api_key.clone())));
    }
    if let Some(endpoint) = &config.tools.python_endpoint {
        tool_registry.register(Arc::new(RunPythonAnalysisTool::new(endpoint.clone())));
    }
    let tools = Arc::new(tool_registry);

    let perception = Arc::new(ImagePerception::new(Arc::new(HeuristicVisualClassifier))?);

    // 5. The Session Orchestrator itself.
    let orchestrator = Arc::new(SessionOrchestrator::new(
        affect.clone(),
        relationships.clone(),
        episodic.clone(),
        persona.clone(),
        history.clone(),
        gateway.clone(),
        tools.clone(),
        config.llm.model.clone(),
        seed.core_persona.clone(),
        Some(perception),
    ));

    // 6. OneBot ingress, if configured; otherwise the engine still runs
    // against the local stdin fallback below.
    let mut onebot_client: Option<Arc<OneBotClient>> = None;
    let mut onebot_source: Option<OneBotSource> = None;
    if let Some(ob) = &config.onebot {
        info!(url = %ob.ws_url, "connecting to OneBot gateway");
        let (client, inbound_rx) = OneBotClient::connect(&ob.ws_url, ob.access_token.as_deref())?;
        onebot_client = Some(Arc::new(client));
        onebot_source = Some(OneBotSource::new(ob.self_id, inbound_rx));
    } else {
        info!("no [onebot] section configured, running with the local stdin fallback only");
    }

    let cancel = CancellationToken::new();
    // Timestamp (epoch seconds) of the last inbound activity, read by the
    // dream consolidator's idle gate (§4.8: "skip if recent activity").
    let last_activity = Arc::new(AtomicI64::new(0));

    // 7. Ingress & Debouncer (§4.5): batches inbound events per session
    // before handing them to the orchestrator.
    let debouncer = {
        let orchestrator = orchestrator.clone();
        let onebot_client = onebot_client.clone();
        let last_activity = last_activity.clone();
        Debouncer::new(Duration::from_millis(config.debounce.wait_time_ms), move |session_id: SessionId, events: Vec<InboundMessage>| {
            let orchestrator = orchestrator.clone();
            let onebot_client = onebot_client.clone();
            let last_activity = last_activity.clone();
            async move {
                last_activity.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
                let Some(first) = events.first().cloned() else { return };
                let user_id = UserId::from(first.user_id.to_string());
                let is_mentioned = events.iter().any(|e| e.is_mentioned);
                let sender_display_name = first.sender_card.clone().unwrap_or_else(|| first.sender_nickname.clone());
                let messages: Vec<InboundText> =
                    events.iter().map(|e| InboundText { text: e.raw_text.clone(), segments: e.segments.clone() }).collect();

                let input = PipelineInput {
                    session_id: session_id.clone(),
                    user_id,
                    session_kind: first.message_type,
                    sender_display_name,
                    group_id: first.group_id,
                    messages,
                    is_mentioned,
                    is_proactive: false,
                };
                let outcome = orchestrator.run(input).await;
                route_outbound(&onebot_client, first.group_id, first.user_id, &session_id.to_string(), outcome).await;
            }
        })
    };

    if let Some(mut source) = onebot_source {
        let debouncer = debouncer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("onebot ingress loop shutting down");
                        return;
                    }
                    event = source.next_event() => {
                        match event {
                            Some((session_id, inbound)) => debouncer.add(session_id, inbound).await,
                            None => {
                                warn!("onebot ingress source closed, stopping ingress loop");
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    // Local stdin fallback: a blocking readline thread feeding the same
    // debounced pipeline under a synthetic `cli:local` session, useful for
    // interactive smoke-testing without a live OneBot gateway.
    let (stdin_tx, mut stdin_rx) = tokio::sync::mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let mut rl = match rustyline::DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                warn!(error = %e, "failed to initialize readline, stdin fallback disabled");
                return;
            }
        };
        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(line.as_str());
                    if stdin_tx.blocking_send(line).is_err() {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    });

    // 8. Proactive Scheduler (§4.7): fires on its own tick, independent of
    // inbound traffic.
    let proactive_scheduler = Arc::new(ProactiveScheduler::new(orchestrator.clone(), relationships.clone(), affect.clone(), config.proactive.active_session_window_hours));
    let proactive_handle = {
        let onebot_client = onebot_client.clone();
        proactive_scheduler.clone().spawn(Duration::from_secs(config.proactive.tick_secs), cancel.clone(), move |meta: SessionMeta, outcome: PipelineOutcome| {
            let onebot_client = onebot_client.clone();
            async move {
                let label = meta.session_id.sanitized();
                let user_id: i64 = meta.user_id.0.parse().unwrap_or_default();
                route_outbound(&onebot_client, meta.group_id, user_id, &label, outcome).await;
            }
        })
    };

    // 9. Dream Consolidator (§4.8): long-interval prune-and-consolidate
    // loop, gated by recent activity to avoid write contention.
    let dream_consolidator = DreamConsolidator::new(pool.clone(), affect.clone(), config.data.data_dir.clone());
    let dream_summarizer = LlmDreamSummarizer::new(gateway.clone(), config.llm.model.clone());
    let dream_handle = {
        let cancel = cancel.clone();
        let episodic = episodic.clone();
        let last_activity = last_activity.clone();
        let interval_secs = config.dream.interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("dream consolidator shutting down");
                        return;
                    }
                    _ = interval.tick() => {
                        let last = last_activity.load(Ordering::Relaxed);
                        let last_dt = if last == 0 { None } else { chrono::DateTime::<chrono::Utc>::from_timestamp(last, 0) };
                        if nyx_memory::dream::should_skip_for_activity(last_dt) {
                            continue;
                        }
                        match dream_consolidator.run_once(&episodic, &dream_summarizer).await {
                            Ok(true) => info!("dream consolidator did work this cycle"),
                            Ok(false) => {}
                            Err(e) => warn!(error = %e, "dream consolidation cycle failed"),
                        }
                    }
                }
            }
        })
    };

    // 10. Periodic vector cleanup (§4.3): sweeps every known user's
    // episodic memory on a long interval, independent of the dream loop.
    let cleanup_handle = {
        let cancel = cancel.clone();
        let relationships = relationships.clone();
        let episodic = episodic.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(6 * 3600));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("vector cleanup ticker shutting down");
                        return;
                    }
                    _ = interval.tick() => {
                        match relationships.all_user_ids().await {
                            Ok(user_ids) => {
                                for user_id in user_ids {
                                    if let Err(e) = episodic.periodic_cleanup(&user_id).await {
                                        warn!(error = %e, user_id = %user_id, "periodic episodic cleanup failed");
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "failed to list user ids for periodic cleanup"),
                        }
                    }
                }
            }
        })
    };

    info!("Nyx is running. Press Ctrl-C to shut down.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C, shutting down");
                break;
            }
            Some(line) = stdin_rx.recv() => {
                let msg = synthetic_local_message(&line);
                debouncer.add(SessionId::from("cli:local"), msg).await;
            }
        }
    }

    cancel.cancel();
    graceful_shutdown(proactive_handle, dream_handle, cleanup_handle).await;

    if let Err(e) = gateway.cache().snapshot_to_disk(&cache_snapshot_path) {
        warn!(error = %e, "failed to snapshot llm cache to disk on shutdown");
    }

    info!("Nyx shut down cleanly");
    Ok(())
}

fn build_provider(config: &EngineConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.llm.provider.as_str() {
        "mock" => Arc::new(MockProvider::new(None)),
        "anthropic" => {
            let key = config
                .llm
                .api_key
                .clone()
                .ok_or_else(|| StartupError::MissingConfig("llm.api_key is required for provider 'anthropic'".to_string()))?;
            Arc::new(AnthropicProvider::new(key, config.llm.base_url.clone()))
        }
        "openai" | "deepseek" | "siliconflow" | "mimo" | "aizex" => {
            let key = config
                .llm
                .api_key
                .clone()
                .ok_or_else(|| StartupError::MissingConfig(format!("llm.api_key is required for provider '{}'", config.llm.provider)))?;
            let base = config.llm.base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            Arc::new(OpenAiCompatProvider::new(key, base))
        }
        other => {
            warn!(provider = other, "unknown llm provider, falling back to the mock provider");
            Arc::new(MockProvider::new(None))
        }
    };
    Ok(provider)
}

/// Routes a pipeline outcome's assistant message to the wire, or prints it
/// locally when no OneBot gateway is configured.
async fn route_outbound(onebot_client: &Option<Arc<OneBotClient>>, group_id: Option<i64>, user_id: i64, session_label: &str, outcome: PipelineOutcome) {
    let Some(text) = outcome.assistant_message else { return };
    match onebot_client {
        Some(client) => {
            let result = match group_id {
                Some(gid) => client.send_group_msg(gid, &text).await,
                None => client.send_private_msg(user_id, &text).await,
            };
            if let Err(e) = result {
                warn!(error = %e, session = %session_label, "failed to deliver outbound message");
            }
        }
        None => println!("[{session_label}] Nyx: {text}"),
    }
}

fn synthetic_local_message(line: &str) -> InboundMessage {
    InboundMessage {
        message_type: MessageKind::Private,
        self_id: 0,
        user_id: 0,
        group_id: None,
        sender_nickname: "local".to_string(),
        sender_card: None,
        segments: vec![Segment::Text(line.to_string())],
        is_mentioned: true,
        raw_text: line.to_string(),
    }
}

async fn graceful_shutdown(proactive: tokio::task::JoinHandle<()>, dream: tokio::task::JoinHandle<()>, cleanup: tokio::task::JoinHandle<()>) {
    let joined = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(proactive, dream, cleanup) }).await;
    if joined.is_err() {
        warn!("background loops did not shut down within 5s, proceeding with exit");
    }
}

fn setup_tracing(args: &Args, config: &EngineConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let log_file = args.log_file.clone().unwrap_or_else(|| config.data.log_dir.join("nyx.log").to_string_lossy().to_string());
    let log_path = std::path::Path::new(&log_file);
    let file_appender =
        tracing_appender::rolling::daily(log_path.parent().unwrap_or_else(|| std::path::Path::new(".")), log_path.file_name().unwrap_or(std::ffi::OsStr::new("nyx.log")));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked so the writer lives for the process's lifetime.
    std::mem::forget(guard);

    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(fmt::layer().json().with_writer(non_blocking))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(fmt::layer().with_writer(non_blocking))
            .init();
    }
    Ok(())
}
