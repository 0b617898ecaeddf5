//! dyad-node
//!
//! Runs one side of a dyadic categorization session. Start the follower
//! and the initiator on the two machines (or twice on one machine with
//! swapped ports); results are appended to a JSON-lines file.
//!
//! Every flag can also be set through a `DYAD_*` environment variable.
//! Logging is controlled by `RUST_LOG` (default `info`).

mod host;

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dyad_sync::core::{
    HandshakeFailurePolicy, ProtocolConfigBuilder, Role, constants::DEFAULT_SYNC_PORT,
};
use dyad_sync::round::JsonLinesSink;
use dyad_sync::RoundController;
use tracing::{info, warn};

use crate::host::{ConsoleHost, parse_script};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Initiator,
    Follower,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Initiator => Role::Initiator,
            RoleArg::Follower => Role::Follower,
        }
    }
}

#[derive(Parser)]
#[command(name = "dyad-node")]
#[command(version, about = "Run one side of a dyadic trial session")]
struct Cli {
    /// Role of this machine
    #[arg(short, long, value_enum, env = "DYAD_ROLE", default_value = "initiator")]
    role: RoleArg,

    /// Local peer id
    #[arg(long, env = "DYAD_ID", default_value = "A")]
    id: String,

    /// Remote peer id
    #[arg(long, env = "DYAD_PEER_ID", default_value = "B")]
    peer_id: String,

    /// Local stage-sync address
    #[arg(long, env = "DYAD_BIND", default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_SYNC_PORT)))]
    bind: SocketAddr,

    /// Remote stage-sync address
    #[arg(long, env = "DYAD_REMOTE")]
    remote: SocketAddr,

    /// Number of rounds
    #[arg(short = 'n', long, env = "DYAD_ROUNDS", default_value_t = 10)]
    rounds: u32,

    /// Answer script, e.g. "300:face,800:car,-" (random answers if unset)
    #[arg(long, env = "DYAD_SCRIPT")]
    script: Option<String>,

    /// Probability that a random answer is correct
    #[arg(long, env = "DYAD_ACCURACY", default_value_t = 0.7, value_parser = host::parse_accuracy)]
    accuracy: f64,

    /// Keep going alone if the peer never answers the handshake
    #[arg(long, env = "DYAD_SINGLE_PEER_FALLBACK")]
    single_peer_fallback: bool,

    /// Handshake timeout in seconds
    #[arg(long, env = "DYAD_CONNECT_TIMEOUT", default_value_t = 30)]
    connect_timeout: u64,

    /// Presentation window in milliseconds
    #[arg(long, env = "DYAD_PRESENTATION_MS", default_value_t = 2000)]
    presentation_ms: u64,

    /// Feedback window in milliseconds
    #[arg(long, env = "DYAD_FEEDBACK_MS", default_value_t = 3000)]
    feedback_ms: u64,

    /// JSON-lines result file
    #[arg(short, long, env = "DYAD_OUTPUT", default_value = "dyad-results.jsonl")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let host = match &cli.script {
        Some(script) => ConsoleHost::scripted(parse_script(script)?),
        None => ConsoleHost::random(cli.accuracy),
    };

    let policy = if cli.single_peer_fallback {
        HandshakeFailurePolicy::SinglePeerFallback
    } else {
        HandshakeFailurePolicy::Abort
    };

    let config = ProtocolConfigBuilder::new()
        .role(cli.role.into())
        .peers(cli.id.clone(), cli.peer_id.clone())
        .bind_addr(cli.bind)
        .remote_addr(cli.remote)
        .rounds(cli.rounds)
        .connect_timeout(Duration::from_secs(cli.connect_timeout))
        .on_handshake_failure(policy)
        .stage_windows(
            Duration::from_millis(cli.presentation_ms),
            Duration::from_millis(cli.feedback_ms),
        )
        .build();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cli.output)?;
    let sink = JsonLinesSink::new(file);

    let mut controller = RoundController::bind(config, host, sink).await?;

    let cancel = controller.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, ending session");
            cancel.cancel();
        }
    });

    info!(bind = %cli.bind, remote = %cli.remote, output = %cli.output.display(), "node ready");
    let summary = controller.run().await?;

    println!();
    println!("rounds played: {}", summary.rounds_played);
    for (peer, score) in summary.scores.iter() {
        println!("score {peer}: {score}");
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
