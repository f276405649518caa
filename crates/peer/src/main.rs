mod orders;

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use env_logger::Env;
use log::{info, warn};

use orders::DemoOrders;
use tandem::net::{bind_udp, try_map_port, Host, Joiner, LossySocket, PeerLink, SetupConfig};
use tandem::{PacketLossSimulation, Session, SessionConfig, Solo, DEFAULT_PORT};

type PeerSocket = LossySocket<UdpSocket>;

#[derive(Parser)]
#[command(name = "tandem-peer")]
#[command(about = "Two-player lockstep peer")]
#[command(group(ArgGroup::new("mode").required(true).args(["host", "join"])))]
struct Args {
    #[arg(
        long,
        value_name = "PORT",
        num_args = 0..=1,
        default_missing_value = "7777",
        help = "Host a game on PORT (default 7777)"
    )]
    host: Option<u16>,

    #[arg(
        long,
        value_names = ["IP", "PORT"],
        num_args = 1..=2,
        help = "Join the host at IP, port 7777 unless given"
    )]
    join: Option<Vec<String>>,

    #[arg(long, default_value_t = 60, help = "Frames per second")]
    fps: u32,

    #[arg(
        long,
        default_value_t = tandem::session::DEFAULT_CADENCE_FRAMES,
        help = "Frames per lockstep tick"
    )]
    cadence: u32,

    #[arg(long, help = "Leave after this many ticks")]
    ticks: Option<u32>,

    #[arg(long, help = "Shared random seed (host only)")]
    seed: Option<u64>,

    #[arg(long, help = "Issue a short script of commands")]
    demo_orders: bool,

    #[arg(long, help = "Keep playing alone if the peer is lost")]
    continue_solo: bool,

    #[arg(long, value_name = "PERCENT", help = "Drop this share of outgoing datagrams")]
    simulate_loss: Option<f32>,

    #[arg(long, help = "Skip the UPnP port mapping attempt")]
    no_port_mapping: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let setup = SetupConfig {
        port: args.host.unwrap_or(DEFAULT_PORT),
        seed: args.seed,
        port_mapping: !args.no_port_mapping,
        ..Default::default()
    };
    let conditions = args
        .simulate_loss
        .map(PacketLossSimulation::lossy)
        .unwrap_or_default();

    let link = match &args.join {
        Some(target) => join(target, setup, conditions)?,
        None => host(setup, conditions)?,
    };

    let config = SessionConfig {
        cadence_frames: args.cadence.max(1),
        ..Default::default()
    };
    let frame_time = Duration::from_secs_f64(1.0 / f64::from(args.fps.max(1)));
    let mut session = Session::new(link, config);
    let mut orders = args.demo_orders.then(|| DemoOrders::new(session.team()));

    let outcome = loop {
        let started = Instant::now();
        if let Some(action) = orders.as_mut().and_then(|o| o.next(session.sim())) {
            info!("issuing {}", action.name());
            session.queue_command(action);
        }

        match session.advance_frame() {
            Ok(report) => {
                if let Some(tick) = report.executed.filter(|tick| tick % 60 == 0) {
                    info!(
                        "tick {tick}, frame {}, rtt {:.1} ms",
                        report.frame,
                        session.stats().rtt_ms
                    );
                }
            }
            Err(e) => break Some(e),
        }
        for (command, reason) in session.take_rejections() {
            info!("{} for tick {} rejected: {reason}", command.action.name(), command.tick);
        }
        if args.ticks.is_some_and(|limit| session.next_tick() >= limit) {
            session.leave()?;
            break None;
        }

        pace(started, frame_time);
    };

    match outcome {
        None => report_final("lockstep", session.sim().tick(), session.sim().checksum()),
        Some(e) if args.continue_solo => {
            warn!("session ended ({e}); continuing alone");
            let solo = session.into_solo();
            run_solo(solo, orders, args.ticks, frame_time);
        }
        Some(e) => return Err(e).context("session ended"),
    }
    Ok(())
}

fn host(setup: SetupConfig, conditions: PacketLossSimulation) -> Result<PeerLink<PeerSocket>> {
    let socket = bind_udp(("0.0.0.0", setup.port))
        .with_context(|| format!("binding UDP port {}", setup.port))?;
    info!("hosting on UDP {}", socket.local_addr()?);
    let mapping = if setup.port_mapping {
        try_map_port(setup.port)
    } else {
        None
    };

    let host = Host::with_socket(LossySocket::new(socket, conditions, 1), setup);
    info!("waiting for a peer, seed {}", host.params().seed);
    let mut link = host.accept().context("accepting peer")?;
    link.port_mapping = mapping;
    Ok(link)
}

fn join(
    target: &[String],
    setup: SetupConfig,
    conditions: PacketLossSimulation,
) -> Result<PeerLink<PeerSocket>> {
    let ip: IpAddr = target
        .first()
        .context("missing host address")?
        .parse()
        .context("invalid host address")?;
    let port = match target.get(1) {
        Some(port) => port.parse().context("invalid port")?,
        None => DEFAULT_PORT,
    };

    let socket = bind_udp("0.0.0.0:0")?;
    let socket = LossySocket::new(socket, conditions, 2);
    let link = Joiner::with_socket(socket, SocketAddr::new(ip, port), setup, Instant::now())?
        .wait()
        .with_context(|| format!("joining {ip}:{port}"))?;
    Ok(link)
}

fn run_solo(
    mut solo: Solo,
    mut orders: Option<DemoOrders>,
    ticks: Option<u32>,
    frame_time: Duration,
) {
    while ticks.is_none_or(|limit| solo.sim().tick() < limit) {
        let started = Instant::now();
        if let Some(action) = orders.as_mut().and_then(|o| o.next(solo.sim())) {
            solo.queue_command(action);
        }
        solo.advance_frame();
        for (command, reason) in solo.take_rejections() {
            info!("{} for tick {} rejected: {reason}", command.action.name(), command.tick);
        }
        pace(started, frame_time);
    }
    report_final("solo", solo.sim().tick(), solo.sim().checksum());
}

fn report_final(mode: &str, tick: u32, checksum: u32) {
    info!("{mode} run stopped at tick {tick}, state checksum {checksum:#010x}");
}

fn pace(started: Instant, frame_time: Duration) {
    if let Some(rest) = frame_time.checked_sub(started.elapsed()) {
        thread::sleep(rest);
    }
}
