use chrono::Utc;
use clap::Parser;
use emergency_call::calls::media::{ChannelProfile, LoopbackEngine, LoopbackMediaHub, MediaEngine};
use emergency_call::calls::{CallManager, MediaEngineAdapter};
use emergency_call::permissions::StaticPermissionGate;
use emergency_call::profile::StoreProfileDirectory;
use emergency_call::store::traits::{Collection, DocRef, DocumentStore, fields_from};
use emergency_call::store::InMemoryStore;
use emergency_call::types::events::CallEvent;
use emergency_call::{CallError, CallManagerConfig, LocalSessionView};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// Runs a caller and a responder in one process against an in-memory document
// store and a loopback media engine, and walks one call between them.
//
// Usage:
//   cargo run                                  # call, answer, talk, hang up
//   cargo run -- --no-answer --ring-timeout-secs 3
//   cargo run -- --reject                      # responder declines
//   cargo run -- --no-media                    # engine missing at startup
//   cargo run -- --deny-mic                    # microphone refused
//
// Ctrl+C hangs up and shuts both clients down.

#[derive(Parser, Debug)]
#[command(about = "Simulate a voice call between a user and a responder")]
struct Args {
    /// JSON file with a call manager configuration.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    #[arg(long, default_value = "citizen-1")]
    caller: String,

    #[arg(long, default_value = "unit-12")]
    responder: String,

    #[arg(long)]
    emergency_id: Option<String>,

    /// Overrides the configured ring timeout.
    #[arg(long)]
    ring_timeout_secs: Option<u64>,

    /// Start the caller without a media engine.
    #[arg(long)]
    no_media: bool,

    /// Refuse microphone access on the caller.
    #[arg(long)]
    deny_mic: bool,

    /// Let the call ring out instead of answering.
    #[arg(long)]
    no_answer: bool,

    /// Decline the call on the responder.
    #[arg(long)]
    reject: bool,

    /// How long the answered call stays up.
    #[arg(long, default_value_t = 2)]
    talk_secs: u64,
}

struct Party {
    name: String,
    manager: Arc<CallManager>,
    events: broadcast::Receiver<CallEvent>,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Utc::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            return;
        }
    };
    if let Some(secs) = args.ring_timeout_secs {
        config.ring_timeout = Some(Duration::from_secs(secs));
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {}", e);
            return;
        }
    };

    rt.block_on(async {
        if let Err(e) = run(args, config).await {
            error!("{:#}", e);
        }
    });
}

fn load_config(args: &Args) -> anyhow::Result<CallManagerConfig> {
    let Some(path) = args.config.as_ref() else {
        return Ok(CallManagerConfig {
            app_id: "demo".to_string(),
            ..Default::default()
        });
    };
    let json = std::fs::read_to_string(path)?;
    Ok(CallManagerConfig::from_json(&json)?)
}

async fn run(args: Args, config: CallManagerConfig) -> anyhow::Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let hub = LoopbackMediaHub::new();

    store
        .set(
            &DocRef::new(Collection::Responders, &args.responder),
            fields_from(&serde_json::json!({ "displayName": "Ambulance Unit 12" }))?,
        )
        .await?;
    store
        .set(
            &DocRef::new(Collection::Users, &args.caller),
            fields_from(&serde_json::json!({ "name": "Jamie" }))?,
        )
        .await?;

    let caller_engine = (!args.no_media).then(|| hub.engine());
    let mut caller = connect(
        &config,
        store.clone(),
        caller_engine,
        !args.deny_mic,
        &args.caller,
    )
    .await?;
    let mut responder =
        connect(&config, store.clone(), Some(hub.engine()), true, &args.responder).await?;

    // Either way both clients shut down, which hangs up a call in progress.
    let result = tokio::select! {
        result = call_flow(&args, &mut caller, &mut responder) => result,
        _ = interrupted() => {
            info!("Received Ctrl+C, hanging up");
            Ok(())
        }
    };

    caller.manager.shutdown().await;
    responder.manager.shutdown().await;
    result
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn connect(
    config: &CallManagerConfig,
    store: Arc<InMemoryStore>,
    engine: Option<Arc<LoopbackEngine>>,
    microphone: bool,
    user_id: &str,
) -> anyhow::Result<Party> {
    let media = MediaEngineAdapter::load(
        engine.map(|e| e as Arc<dyn MediaEngine>),
        &config.app_id,
        ChannelProfile::Communication,
    )
    .await;
    let manager = CallManager::new(
        config.clone(),
        store.clone(),
        Arc::new(StoreProfileDirectory::new(store)),
        Arc::new(StaticPermissionGate::new(microphone)),
        media,
    );
    manager.sign_in(user_id).await?;
    let events = manager.subscribe_events();
    Ok(Party {
        name: user_id.to_string(),
        manager,
        events,
    })
}

async fn call_flow(args: &Args, caller: &mut Party, responder: &mut Party) -> anyhow::Result<()> {
    let channel = match caller
        .manager
        .start_call(&args.responder, "Responder", args.emergency_id.as_deref())
        .await
    {
        Ok(channel) => channel,
        Err(e @ (CallError::MediaUnavailable | CallError::PermissionDenied)) => {
            warn!("{} could not start a call: {}", caller.name, e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    info!("{} is calling on {}", caller.name, channel);

    next_event(responder, |e| matches!(e, CallEvent::Incoming(_))).await?;
    print_view(responder);

    if args.no_answer {
        if caller.manager.config().ring_timeout.is_none() {
            warn!("No ring timeout configured; hanging up instead of waiting forever");
            caller.manager.end_call().await;
        }
        next_event(caller, |e| matches!(e, CallEvent::Ended { .. })).await?;
        next_event(responder, |e| matches!(e, CallEvent::Ended { .. })).await?;
        return Ok(());
    }

    if args.reject {
        responder.manager.reject_call().await?;
        next_event(caller, |e| matches!(e, CallEvent::Ended { .. })).await?;
        return Ok(());
    }

    responder.manager.answer_call().await?;
    // Answer and media presence arrive on separate paths, in either order.
    let mut view = caller.manager.watch_view();
    tokio::time::timeout(
        Duration::from_secs(30),
        view.wait_for(|v| v.is_in_call && v.remote_user_joined),
    )
    .await??;
    print_view(caller);

    let muted = caller.manager.toggle_mute().await;
    info!("{} muted: {}", caller.name, muted);
    tokio::time::sleep(Duration::from_secs(args.talk_secs)).await;

    responder.manager.end_call().await;
    next_event(caller, |e| matches!(e, CallEvent::Ended { .. })).await?;
    print_view(caller);
    Ok(())
}

async fn next_event<F>(party: &mut Party, mut predicate: F) -> anyhow::Result<CallEvent>
where
    F: FnMut(&CallEvent) -> bool,
{
    let wait = async {
        loop {
            match party.events.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("{} missed {} events", party.name, n);
                }
                Err(e) => return Err(anyhow::Error::from(e)),
            }
        }
    };
    let event = tokio::time::timeout(Duration::from_secs(30), wait).await??;
    info!("{} <- {:?}", party.name, event);
    Ok(event)
}

fn print_view(party: &Party) {
    let view: LocalSessionView = party.manager.view();
    match serde_json::to_string(&view) {
        Ok(json) => info!("{} view: {}", party.name, json),
        Err(e) => warn!("Failed to render view: {}", e),
    }
}
