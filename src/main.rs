//! Entry point for `tick-tcp`.
//!
//! Parses CLI arguments and dispatches into one of three modes:
//! - **simulate**: both endpoints in this process over the in-memory lossy
//!   link, then compare output to input.
//! - **send** / **receive**: one endpoint each, talking over UDP.
//!
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, tick pacing, file handles).

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::time::MissedTickBehavior;

use tick_tcp::driver::{Simulation, TransferReport};
use tick_tcp::simulator::{LossyLink, SimulatorConfig};
use tick_tcp::socket::UdpLink;
use tick_tcp::{Endpoint, EngineConfig, TimeoutPolicy};

/// Reliable byte stream over a lossy link, one packet per tick.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Transfer a file between two in-process endpoints over a simulated link.
    Simulate {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Probability that a packet is lost.
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
        /// Probability that a packet is delivered twice.
        #[arg(long, default_value_t = 0.0)]
        duplicate: f64,
        /// Probability that a packet overtakes the one before it.
        #[arg(long, default_value_t = 0.0)]
        reorder: f64,
        #[arg(long, default_value_t = 0x5eed)]
        seed: u64,
        /// Pace ticks on the wall clock instead of running flat out.
        #[arg(long)]
        realtime: bool,
        #[arg(long, default_value_t = 100_000)]
        max_ticks: u64,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Stream a file to a receiving peer over UDP.
    Send {
        #[arg(short, long)]
        input: PathBuf,
        #[command(flatten)]
        net: NetArgs,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Accept a stream from a sending peer over UDP and write it to a file.
    Receive {
        #[arg(short, long)]
        output: PathBuf,
        /// Ticks to wait for the final ACK after the stream is committed.
        #[arg(long, default_value_t = 50)]
        linger_ticks: u64,
        #[command(flatten)]
        net: NetArgs,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Maximum payload bytes per segment.
    #[arg(long, default_value_t = 1000)]
    mss: usize,
    /// Data segments allowed in flight at once.
    #[arg(long, default_value_t = 5)]
    max_in_flight: usize,
    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Adaptive timeout ceiling in milliseconds.
    #[arg(long, default_value_t = 60_000)]
    max_timeout_ms: u64,
    #[arg(long, value_enum, default_value_t = TimeoutPolicy::Fixed)]
    timeout_policy: TimeoutPolicy,
    /// Tick interval in milliseconds.
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            mss: self.mss,
            max_in_flight: self.max_in_flight,
            send_timeout: Duration::from_millis(self.timeout_ms),
            max_timeout: Duration::from_millis(self.max_timeout_ms),
            timeout_policy: self.timeout_policy,
            ..Default::default()
        }
    }

    fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

#[derive(Args)]
struct NetArgs {
    /// Local UDP address to bind.
    #[arg(short, long)]
    bind: SocketAddr,
    /// UDP address of the other endpoint.
    #[arg(short, long)]
    peer: SocketAddr,
    /// This endpoint's name.
    #[arg(long)]
    id: Option<String>,
    /// The other endpoint's name.
    #[arg(long)]
    peer_id: Option<String>,
    #[arg(long, default_value_t = 100_000)]
    max_ticks: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Simulate {
            input,
            output,
            loss,
            duplicate,
            reorder,
            seed,
            realtime,
            max_ticks,
            engine,
        } => {
            let sim_config = SimulatorConfig {
                loss_rate: loss,
                duplicate_rate: duplicate,
                reorder_rate: reorder,
                seed,
            };
            log::info!("simulating {} → {} with {sim_config:?}", input.display(), output.display());
            let report = simulate(&input, &output, sim_config, &engine, realtime, max_ticks).await?;
            println!("{report}");

            let same = fs::read(&input)? == fs::read(&output)?;
            if report.completed && same {
                println!("SUCCESS");
            } else {
                println!("FAILURE");
                std::process::exit(1);
            }
        }
        Mode::Send { input, net, engine } => {
            let source = BufReader::new(open(&input)?);
            let id = net.id.clone().unwrap_or_else(|| "A".into());
            let peer_id = net.peer_id.clone().unwrap_or_else(|| "B".into());
            log::info!("sending {} as {id} to {peer_id} at {}", input.display(), net.peer);

            let mut endpoint = Endpoint::sender(id, peer_id.as_str(), source, engine.config())?;
            let mut link = UdpLink::bind(net.bind).await?;
            link.add_peer(peer_id, net.peer);
            let started = Instant::now();
            pace(&mut endpoint, &mut link, engine.tick(), net.max_ticks, 0).await?;

            println!("Total bytes sent = {}", endpoint.stats().bytes_sent);
            println!("Total time of transfer = {:.3}", started.elapsed().as_secs_f64());
        }
        Mode::Receive {
            output,
            linger_ticks,
            net,
            engine,
        } => {
            let sink = BufWriter::new(
                File::create(&output).with_context(|| format!("creating {}", output.display()))?,
            );
            let id = net.id.clone().unwrap_or_else(|| "B".into());
            let peer_id = net.peer_id.clone().unwrap_or_else(|| "A".into());
            log::info!("receiving as {id} from {peer_id} at {} into {}", net.peer, output.display());

            let mut endpoint = Endpoint::receiver(id, peer_id.as_str(), sink, engine.config())?;
            let mut link = UdpLink::bind(net.bind).await?;
            link.add_peer(peer_id, net.peer);
            pace(&mut endpoint, &mut link, engine.tick(), net.max_ticks, linger_ticks).await?;

            println!("Delivered bytes = {}", endpoint.delivered_bytes().unwrap_or(0));
        }
    }

    Ok(())
}

fn open(path: &Path) -> anyhow::Result<File> {
    File::open(path).with_context(|| format!("opening {}", path.display()))
}

async fn simulate(
    input: &Path,
    output: &Path,
    sim_config: SimulatorConfig,
    engine: &EngineArgs,
    realtime: bool,
    max_ticks: u64,
) -> anyhow::Result<TransferReport> {
    let source = BufReader::new(open(input)?);
    let sink = BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );
    let sender = Endpoint::sender("A", "B", source, engine.config())?;
    let receiver = Endpoint::receiver("B", "A", sink, engine.config())?;
    let mut sim = Simulation::new(sender, receiver, LossyLink::new(sim_config), engine.tick());

    if !realtime {
        return Ok(sim.run(max_ticks)?);
    }

    let mut interval = tokio::time::interval(engine.tick());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while !sim.is_complete() && sim.ticks() < max_ticks {
        interval.tick().await;
        sim.step_at(Instant::now())?;
    }
    Ok(sim.report())
}

/// Tick one endpoint on the wall clock until it closes.
///
/// A receiver whose stream is committed stops after `linger` more ticks even
/// if the final ACK never arrives.
async fn pace(
    endpoint: &mut Endpoint,
    link: &mut UdpLink,
    tick: Duration,
    max_ticks: u64,
    linger: u64,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut committed_at = None;

    for n in 0..max_ticks {
        interval.tick().await;
        let now = Instant::now();
        endpoint.on_receive_tick(link, now)?;
        endpoint.on_send_tick(link, now)?;

        if endpoint.is_finished() {
            log::info!("[{}] finished after {} tick(s)", endpoint.id(), n + 1);
            return Ok(());
        }
        if endpoint.delivered_bytes().is_some() {
            let since = *committed_at.get_or_insert(n);
            if n - since >= linger {
                log::info!("[{}] no final ACK after {linger} tick(s); exiting", endpoint.id());
                return Ok(());
            }
        }
    }
    bail!("[{}] not finished after {max_ticks} ticks", endpoint.id())
}
