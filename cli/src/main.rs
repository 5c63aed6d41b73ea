use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use peercall_core::{sdp_codec, CallAction, CallApp, CallAppDeps, CallStatus};
use peercall_media::{SimulatedPeerFactory, SyntheticMediaSource};
use peercall_relay::{InMemoryRelay, Relay, RelayMessage};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(name = "peercall")]
#[command(about = "Two-party call signaling over a pub/sub relay")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run two parties against an in-process relay and print the signaling transcript
    Demo {
        /// State directory for both parties' config and logs
        #[arg(long, default_value = ".peercall")]
        state_dir: PathBuf,

        /// Make both parties send an offer at the same time
        #[arg(long)]
        glare: bool,

        /// Hang up this long after the call becomes active (0 = right away)
        #[arg(long, default_value_t = 0)]
        hang_up_after_ms: u64,

        /// Give up waiting for any step after this many seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },

    /// Compress session description text from FILE (or stdin) for transport
    Compress {
        file: Option<PathBuf>,
    },

    /// Decompress transport text from FILE (or stdin) back to a session description
    Decompress {
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Demo {
            state_dir,
            glare,
            hang_up_after_ms,
            timeout_secs,
        } => {
            cmd_demo(
                &state_dir,
                glare,
                Duration::from_millis(hang_up_after_ms),
                Duration::from_secs(timeout_secs),
            )
            .await
        }
        Command::Compress { file } => {
            let text = read_input(file.as_deref())?;
            println!("{}", sdp_codec::compress(&text)?);
            Ok(())
        }
        Command::Decompress { file } => {
            let text = read_input(file.as_deref())?;
            print!("{}", sdp_codec::decompress(&text)?);
            Ok(())
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn read_input(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("read stdin")?;
            Ok(text)
        }
    }
}

fn party(relay: &InMemoryRelay, state_dir: &Path, identity: &str, seed: u64) -> anyhow::Result<Arc<CallApp>> {
    let data_dir = state_dir.join(identity);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create state dir {}", data_dir.display()))?;
    Ok(CallApp::new(
        data_dir.to_string_lossy().to_string(),
        CallAppDeps {
            relay: Arc::new(relay.client(identity)),
            peers: Arc::new(SimulatedPeerFactory::with_seed(identity, seed)),
            media: Arc::new(SyntheticMediaSource::new(identity)),
            contacts: Vec::new(),
        },
    ))
}

async fn wait_for(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) -> anyhow::Result<()> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("timed out waiting for {what}")
}

fn status(app: &CallApp) -> Option<CallStatus> {
    app.state().active_call.map(|c| c.status)
}

fn knows(app: &CallApp, identity: &str) -> bool {
    app.state().contacts.iter().any(|c| c.identity == identity)
}

// ── Commands ────────────────────────────────────────────────────────────────

async fn cmd_demo(
    state_dir: &Path,
    glare: bool,
    hang_up_after: Duration,
    timeout: Duration,
) -> anyhow::Result<()> {
    let relay = InMemoryRelay::new();
    let alice = party(&relay, state_dir, "alice", 1)?;
    let bob = party(&relay, state_dir, "bob", 1000)?;

    wait_for("lobby presence", timeout, || {
        knows(&alice, "bob") && knows(&bob, "alice")
    })
    .await?;
    tracing::info!("both parties in the lobby");

    alice.dispatch(CallAction::StartCall {
        identity: "bob".to_string(),
    });
    wait_for("bob to ring", timeout, || status(&bob) == Some(CallStatus::Ringing)).await?;
    tracing::info!("bob is ringing");

    if glare {
        tracing::info!("holding relay traffic to cross both offers");
        relay.hold();
    }
    bob.dispatch(CallAction::AcceptCall);
    if glare {
        // Alice accepting too makes both sides offer.
        relay
            .client("alice")
            .publish("bob", "callAccept", json!({}))
            .await
            .map_err(|e| anyhow!("forged accept: {e}"))?;
        wait_for("accepts to cross", timeout, || relay.held().len() >= 2).await?;
        relay.deliver_held();
        wait_for("offers to cross", timeout, || {
            relay
                .held()
                .iter()
                .filter(|m| m.topic == "sessionStartRequest")
                .count()
                >= 2
        })
        .await?;
        tracing::info!(held = relay.held().len(), "releasing crossed offers");
        relay.release();
    }

    wait_for("call to become active", timeout, || {
        status(&alice) == Some(CallStatus::Active) && status(&bob) == Some(CallStatus::Active)
    })
    .await?;
    tracing::info!(hang_up_after_ms = hang_up_after.as_millis() as u64, "call active");
    tokio::time::sleep(hang_up_after).await;

    alice.dispatch(CallAction::HangUp);
    wait_for("both sides to end", timeout, || {
        matches!(status(&alice), Some(CallStatus::Terminated { .. }))
            && matches!(status(&bob), Some(CallStatus::Terminated { .. }))
    })
    .await?;
    tracing::info!(messages = relay.history().len(), "both sides ended");

    for msg in relay.history() {
        println!("{}", describe(&msg));
    }
    for (name, app) in [("alice", &alice), ("bob", &bob)] {
        if let Some(call) = app.state().active_call {
            println!("{name}: {:?}", call.status);
        }
    }
    alice.shutdown();
    bob.shutdown();
    Ok(())
}

fn describe(msg: &RelayMessage) -> String {
    let detail = match (&msg.payload["type"], &msg.payload["sdp"]) {
        (Value::String(kind), Value::String(sdp)) => {
            let raw = sdp_codec::decompress(sdp).map(|s| s.len()).unwrap_or(0);
            format!("{kind} ({} bytes compressed, {raw} raw)", sdp.len())
        }
        _ => match &msg.payload {
            Value::String(candidate) => candidate.clone(),
            other => other.to_string(),
        },
    };
    format!("{:>5} -> {:<5} {:<20} {detail}", msg.sender, msg.channel, msg.topic)
}
