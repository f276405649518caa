//! The lockstep tick scheduler.
//!
//! Every `cadence_frames` rendered frames each peer sends the commands its
//! player issued since the last boundary, tagged for the tick after the one
//! about to run, and then executes the next tick once both sides' batches
//! for it are in hand. Rendering never waits on the network: a missing batch
//! only pauses tick advancement, and a pause longer than the stall timeout
//! ends the session.

mod config;
mod inbox;
mod state;

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::net::framer::{batch_frame_size, split_batch};
use crate::net::{
    DatagramSocket, FramingError, HandshakeParams, Message, NetworkStats, PeerLink, PortMapping,
    Role, Transport, TransportError, MAX_PAYLOAD_SIZE,
};
use crate::simulation::{
    merge_batches, run_tick, Action, Command, Rejection, SimState, StateSnapshot, Team, TickBatch,
    TickReport,
};

pub use config::{
    SessionConfig, CHECKSUM_INTERVAL, DEFAULT_CADENCE_FRAMES, LEAVE_LINGER, STALL_TIMEOUT,
};
pub use inbox::{ChecksumLedger, Mismatch, TickInbox};
pub use state::SessionState;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    ConnectionLost(#[from] TransportError),
    #[error("no commands from peer for {0:?}")]
    StallTimeout(Duration),
    #[error("simulation diverged at tick {tick}: local {local:#010x}, remote {remote:#010x}")]
    Desync { tick: u32, local: u32, remote: u32 },
    #[error("peer left the session")]
    PeerLeft,
    #[error("could not encode a command batch: {0}")]
    Encoding(#[from] FramingError),
}

/// What one call to [`Session::advance_frame_at`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    /// Tick executed during this frame, if any.
    pub executed: Option<u32>,
}

pub struct Session<S> {
    transport: Transport<S>,
    role: Role,
    params: HandshakeParams,
    team: Team,
    config: SessionConfig,
    state: SessionState,
    sim: SimState,
    inbox: TickInbox,
    checksums: ChecksumLedger,
    /// Messages that arrived during the handshake, handled on the first frame.
    early: Vec<Message>,
    /// Actions issued since the last cadence boundary.
    pending: Vec<Action>,
    /// Highest tick a local batch has been sent for.
    last_sent_tick: u32,
    frame: u64,
    rejections: Vec<(Command, Rejection)>,
    /// Until when a departed session keeps flushing its unacked goodbye.
    linger_until: Option<Instant>,
    _port_mapping: Option<PortMapping>,
}

impl<S: DatagramSocket> Session<S> {
    pub fn new(link: PeerLink<S>, config: SessionConfig) -> Self {
        let team = link.local_team();
        let params = link.params;
        let mut inbox = TickInbox::new();
        // Tick 0 is the shared starting position with nothing to execute.
        inbox.insert_local(TickBatch::new(0, team));
        inbox.insert_remote(TickBatch::new(0, team.opponent()));

        info!(
            "session started as {:?} ({team}), seed {}, cadence {} frames",
            link.role, params.seed, config.cadence_frames
        );

        Self {
            transport: link.transport,
            role: link.role,
            params,
            team,
            state: SessionState::Connecting,
            sim: SimState::new(params.seed, params.first_net_id),
            inbox,
            checksums: ChecksumLedger::default(),
            early: link.early,
            pending: Vec::new(),
            last_sent_tick: 0,
            frame: 0,
            rejections: Vec::new(),
            linger_until: None,
            _port_mapping: link.port_mapping,
            config,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn team(&self) -> Team {
        self.team
    }

    pub fn params(&self) -> &HandshakeParams {
        &self.params
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Frames processed so far, including those after a disconnect.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The tick that will execute next.
    pub fn next_tick(&self) -> u32 {
        self.sim.tick()
    }

    pub fn sim(&self) -> &SimState {
        &self.sim
    }

    /// Point-in-time copy of the simulation, taken between ticks.
    pub fn snapshot(&self) -> StateSnapshot {
        self.sim.snapshot()
    }

    pub fn stats(&self) -> &NetworkStats {
        self.transport.stats()
    }

    /// Queues a local action. It goes out with the next cadence boundary and
    /// executes one tick later on both peers.
    pub fn queue_command(&mut self, action: Action) {
        self.pending.push(action);
    }

    /// Rejections of this player's own commands since the last call.
    pub fn take_rejections(&mut self) -> Vec<(Command, Rejection)> {
        std::mem::take(&mut self.rejections)
    }

    pub fn advance_frame(&mut self) -> Result<FrameReport, SessionError> {
        self.advance_frame_at(Instant::now())
    }

    /// Runs one rendered frame's worth of networking and, when due, one
    /// tick. The error that ends the session is returned once; afterwards
    /// frames keep counting but nothing executes.
    pub fn advance_frame_at(&mut self, now: Instant) -> Result<FrameReport, SessionError> {
        let frame = self.frame;
        self.frame += 1;
        let mut report = FrameReport {
            frame,
            executed: None,
        };
        if self.state.is_disconnected() {
            self.linger(now);
            return Ok(report);
        }

        match self.pump(frame, now) {
            Ok(executed) => {
                report.executed = executed;
                Ok(report)
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    pub fn leave(&mut self) -> Result<(), SessionError> {
        self.leave_at(Instant::now())
    }

    /// Tells the peer we are going and ends the session. Later frames keep
    /// retransmitting the goodbye for [`LEAVE_LINGER`] or until it is acked;
    /// past that, delivery is best effort.
    pub fn leave_at(&mut self, now: Instant) -> Result<(), SessionError> {
        if self.state.is_disconnected() {
            return Ok(());
        }
        self.state = SessionState::Disconnected;
        info!("leaving session at tick {}", self.sim.tick());
        self.transport.send(&Message::Leave, now)?;
        self.linger_until = Some(now + LEAVE_LINGER);
        Ok(())
    }

    /// Continues the game without the peer. Their team simply stops issuing
    /// commands.
    pub fn into_solo(self) -> Solo {
        info!("continuing single-player at tick {}", self.sim.tick());
        Solo {
            sim: self.sim,
            team: self.team,
            cadence_frames: self.config.cadence_frames,
            pending: self.pending,
            frame: self.frame,
            rejections: self.rejections,
        }
    }

    fn pump(&mut self, frame: u64, now: Instant) -> Result<Option<u32>, SessionError> {
        let mut messages = std::mem::take(&mut self.early);
        messages.extend(self.transport.receive(now)?);
        for message in messages {
            self.handle_message(message)?;
        }

        let boundary = frame % u64::from(self.config.cadence_frames.max(1)) == 0;
        let next_tick = self.sim.tick();
        if boundary && self.last_sent_tick < next_tick + 1 {
            self.send_batch(next_tick + 1, now)?;
        }
        self.transport.flush(now)?;

        if !boundary && !self.state.is_waiting() {
            return Ok(None);
        }

        let Some(batches) = self.inbox.take(next_tick) else {
            return self.wait(next_tick, now).map(|()| None);
        };

        if let SessionState::Waiting { since } = self.state {
            debug!("tick {next_tick} released after {:?}", now.saturating_duration_since(since));
        }
        self.state = SessionState::Synced;
        let report = run_tick(&mut self.sim, merge_batches(batches));
        self.record(report);
        self.exchange_checksum(now)?;
        Ok(Some(next_tick))
    }

    fn handle_message(&mut self, message: Message) -> Result<(), SessionError> {
        match message {
            Message::TickCommandsPart(batch) => {
                if self.accepts(&batch) && !self.inbox.insert_remote_part(batch) {
                    debug!("part for an already complete tick ignored");
                }
            }
            Message::TickCommands(batch) => {
                if self.accepts(&batch) && !self.inbox.insert_remote(batch) {
                    debug!("second batch for the same tick ignored");
                }
            }
            Message::Checksum { tick, value } => {
                if let Some(mismatch) = self.checksums.record_remote(tick, value) {
                    return Err(self.desync(mismatch));
                }
            }
            Message::Leave => {
                info!("peer left at tick {}", self.sim.tick());
                return Err(SessionError::PeerLeft);
            }
            other => debug!("{} outside the handshake ignored", other.kind()),
        }
        Ok(())
    }

    fn accepts(&self, batch: &TickBatch) -> bool {
        if batch.origin == self.team {
            warn!("peer sent a batch for our own {}; ignored", self.team);
            false
        } else if batch.tick < self.sim.tick() {
            debug!("batch for executed tick {} ignored", batch.tick);
            false
        } else {
            true
        }
    }

    /// Sends the pending actions as the batch for `tick`, split across as
    /// many messages as the packet size needs. On failure the actions stay
    /// pending.
    fn send_batch(&mut self, tick: u32, now: Instant) -> Result<(), SessionError> {
        let team = self.team;
        let sizes = self
            .pending
            .iter()
            .map(|action| batch_frame_size(tick, team, std::slice::from_ref(action)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut actions = Vec::with_capacity(sizes.len());
        let pending = std::mem::take(&mut self.pending);
        for (seq, (action, bytes)) in pending.into_iter().zip(sizes).enumerate() {
            if bytes > MAX_PAYLOAD_SIZE {
                warn!("{} for tick {tick} is {bytes} bytes framed; dropped", action.name());
                let command = Command::new(tick, team, seq as u32, action);
                self.rejections.push((command, Rejection::TooLarge { bytes }));
            } else {
                actions.push(action);
            }
        }

        let batch = TickBatch::with_actions(tick, team, actions);
        let sent = split_batch(&batch, MAX_PAYLOAD_SIZE)
            .map_err(SessionError::from)
            .and_then(|messages| {
                if messages.len() > 1 {
                    debug!("batch for tick {tick} split into {} messages", messages.len());
                }
                for message in &messages {
                    self.transport.send(message, now)?;
                }
                Ok(())
            });
        if let Err(e) = sent {
            self.pending = batch.actions;
            return Err(e);
        }

        self.inbox.insert_local(batch);
        self.last_sent_tick = tick;
        Ok(())
    }

    /// Keeps an unacked goodbye moving after the session has ended.
    fn linger(&mut self, now: Instant) {
        let Some(until) = self.linger_until else {
            return;
        };
        if now >= until || self.transport.unacked_count() == 0 {
            self.linger_until = None;
            return;
        }
        let flushed = self
            .transport
            .receive(now)
            .and_then(|_| self.transport.flush(now));
        if let Err(e) = flushed {
            debug!("stopped retransmitting goodbye: {e}");
            self.linger_until = None;
        }
    }

    fn wait(&mut self, tick: u32, now: Instant) -> Result<(), SessionError> {
        match self.state {
            SessionState::Waiting { since } => {
                let stalled = now.saturating_duration_since(since);
                if stalled > self.config.stall_timeout {
                    warn!("no batch for tick {tick} after {stalled:?}; giving up");
                    match self.transport.send(&Message::Leave, now) {
                        Ok(_) => self.linger_until = Some(now + LEAVE_LINGER),
                        Err(e) => debug!("could not notify peer: {e}"),
                    }
                    return Err(SessionError::StallTimeout(stalled));
                }
            }
            _ => {
                debug!(
                    "waiting for tick {tick} (local {}, remote {})",
                    self.inbox.has_local(tick),
                    self.inbox.has_remote(tick)
                );
                self.state = SessionState::Waiting { since: now };
            }
        }
        Ok(())
    }

    fn record(&mut self, report: TickReport) {
        let team = self.team;
        self.rejections.extend(
            report
                .rejected
                .into_iter()
                .filter(|(command, _)| command.origin == team),
        );
    }

    fn exchange_checksum(&mut self, now: Instant) -> Result<(), SessionError> {
        let interval = self.config.checksum_interval;
        let tick = self.sim.tick();
        if interval == 0 || tick % interval != 0 {
            return Ok(());
        }

        let value = self.sim.checksum();
        self.transport.send(&Message::Checksum { tick, value }, now)?;
        match self.checksums.record_local(tick, value) {
            Some(mismatch) => Err(self.desync(mismatch)),
            None => Ok(()),
        }
    }

    fn desync(&self, mismatch: Mismatch) -> SessionError {
        error!(
            "desync at tick {}: local {:#010x}, remote {:#010x}",
            mismatch.tick, mismatch.local, mismatch.remote
        );
        SessionError::Desync {
            tick: mismatch.tick,
            local: mismatch.local,
            remote: mismatch.remote,
        }
    }
}

/// Single-player continuation of a session whose peer is gone.
#[derive(Debug)]
pub struct Solo {
    sim: SimState,
    team: Team,
    cadence_frames: u32,
    pending: Vec<Action>,
    frame: u64,
    rejections: Vec<(Command, Rejection)>,
}

impl Solo {
    pub fn team(&self) -> Team {
        self.team
    }

    pub fn sim(&self) -> &SimState {
        &self.sim
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.sim.snapshot()
    }

    pub fn queue_command(&mut self, action: Action) {
        self.pending.push(action);
    }

    pub fn take_rejections(&mut self) -> Vec<(Command, Rejection)> {
        std::mem::take(&mut self.rejections)
    }

    /// Runs one frame, executing a tick on cadence boundaries. The other
    /// team's batch is always empty.
    pub fn advance_frame(&mut self) -> FrameReport {
        let frame = self.frame;
        self.frame += 1;
        if frame % u64::from(self.cadence_frames.max(1)) != 0 {
            return FrameReport {
                frame,
                executed: None,
            };
        }

        let tick = self.sim.tick();
        let local = TickBatch::with_actions(tick, self.team, std::mem::take(&mut self.pending));
        let remote = TickBatch::new(tick, self.team.opponent());
        let report = run_tick(&mut self.sim, merge_batches([local, remote]));
        self.rejections.extend(report.rejected);
        FrameReport {
            frame,
            executed: Some(tick),
        }
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("team", &self.team)
            .field("state", &self.state)
            .field("frame", &self.frame)
            .field("tick", &self.sim.tick())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::net::{
        Host, Joiner, PacketLossSimulation, SetupConfig, SimulatedLink, SimulatedSocket,
        TransportConfig,
    };
    use crate::simulation::NetId;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn linked_pair(
        link: &SimulatedLink,
        now: Instant,
    ) -> (PeerLink<SimulatedSocket>, PeerLink<SimulatedSocket>) {
        let config = SetupConfig {
            seed: Some(77),
            port_mapping: false,
            transport: TransportConfig {
                disconnect_timeout: Duration::from_secs(60),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut host = Host::with_socket(link.bind(addr(1)), config.clone());
        let mut joiner = Joiner::with_socket(link.bind(addr(2)), addr(1), config, now).unwrap();
        assert!(host.poll(now).unwrap().is_none());
        let joined = joiner.poll(now).unwrap().unwrap();
        let hosted = host.poll(now).unwrap().unwrap();
        (hosted, joined)
    }

    fn sessions(now: Instant) -> (Session<SimulatedSocket>, Session<SimulatedSocket>) {
        let link = SimulatedLink::reliable();
        let (host, joiner) = linked_pair(&link, now);
        (
            Session::new(host, SessionConfig::default()),
            Session::new(joiner, SessionConfig::default()),
        )
    }

    #[test]
    fn first_boundary_executes_tick_zero() {
        let now = Instant::now();
        let (mut host, mut joiner) = sessions(now);
        assert_eq!(host.state(), SessionState::Connecting);

        assert_eq!(host.advance_frame_at(now).unwrap().executed, Some(0));
        assert_eq!(joiner.advance_frame_at(now).unwrap().executed, Some(0));
        assert_eq!(host.state(), SessionState::Synced);
        assert_eq!(host.next_tick(), 1);
    }

    #[test]
    fn frames_between_boundaries_do_not_tick() {
        let now = Instant::now();
        let (mut host, mut joiner) = sessions(now);

        for frame in 0..12u64 {
            let at = now + Duration::from_millis(frame * 16);
            let report = host.advance_frame_at(at).unwrap();
            joiner.advance_frame_at(at).unwrap();
            assert_eq!(report.frame, frame);
            assert_eq!(report.executed.is_some(), frame % 4 == 0);
        }
        assert_eq!(host.next_tick(), 3);
        assert_eq!(joiner.next_tick(), 3);
    }

    #[test]
    fn missing_batch_means_waiting() {
        let now = Instant::now();
        let (mut host, mut joiner) = sessions(now);
        host.advance_frame_at(now).unwrap();
        joiner.advance_frame_at(now).unwrap();

        // The host runs two cadences ahead. Tick 1 goes through on the
        // joiner's first batch, tick 2 has nothing from the joiner yet.
        for frame in 1..=8u64 {
            host.advance_frame_at(now + Duration::from_millis(frame * 16)).unwrap();
        }
        assert!(host.state().is_waiting());
        assert_eq!(host.next_tick(), 2);

        // Once the joiner reaches its boundary the host proceeds on its very
        // next frame, even off-cadence.
        for frame in 1..=4u64 {
            joiner.advance_frame_at(now + Duration::from_millis(frame * 16)).unwrap();
        }
        let report = host.advance_frame_at(now + Duration::from_millis(144)).unwrap();
        assert_eq!(report.frame, 9);
        assert_eq!(report.executed, Some(2));
        assert_eq!(host.state(), SessionState::Synced);
    }

    #[test]
    fn rejected_local_commands_are_surfaced() {
        let now = Instant::now();
        let (mut host, mut joiner) = sessions(now);
        // Team B's first worker is not the host's to move.
        host.queue_command(Action::Move {
            unit_ids: vec![NetId(6)],
            to: glam::Vec2::new(10.0, 10.0),
        });

        for frame in 0..8u64 {
            let at = now + Duration::from_millis(frame * 16);
            host.advance_frame_at(at).unwrap();
            joiner.advance_frame_at(at).unwrap();
        }

        let rejections = host.take_rejections();
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].0.tick, 1);
        assert_eq!(rejections[0].1, Rejection::NotOwned(NetId(6)));
        assert!(joiner.take_rejections().is_empty());
    }

    #[test]
    fn leave_ends_both_sides() {
        let now = Instant::now();
        let (mut host, mut joiner) = sessions(now);
        host.advance_frame_at(now).unwrap();
        joiner.advance_frame_at(now).unwrap();

        host.leave().unwrap();
        assert!(host.state().is_disconnected());
        assert!(matches!(joiner.advance_frame_at(now), Err(SessionError::PeerLeft)));
        assert!(joiner.advance_frame_at(now).is_ok());
    }

    #[test]
    fn goodbye_is_retransmitted_after_leaving() {
        let now = Instant::now();
        let link = SimulatedLink::reliable();
        let (host, joiner) = linked_pair(&link, now);
        let mut host = Session::new(host, SessionConfig::default());
        let mut joiner = Session::new(joiner, SessionConfig::default());
        host.advance_frame_at(now).unwrap();
        joiner.advance_frame_at(now).unwrap();

        link.set_conditions(PacketLossSimulation::lossy(100.0));
        host.leave_at(now).unwrap();
        link.set_conditions(PacketLossSimulation::default());
        assert!(joiner.advance_frame_at(now).is_ok());

        for frame in 1..=3u64 {
            host.advance_frame_at(now + Duration::from_millis(frame * 16)).unwrap();
        }
        let at = now + Duration::from_millis(48);
        assert!(matches!(joiner.advance_frame_at(at), Err(SessionError::PeerLeft)));
    }

    #[test]
    fn command_too_large_for_a_packet_is_rejected_locally() {
        let now = Instant::now();
        let (mut host, mut joiner) = sessions(now);
        host.queue_command(Action::Move {
            unit_ids: (1..400).map(NetId).collect(),
            to: glam::Vec2::ZERO,
        });
        host.queue_command(Action::Chat {
            message: "still here".into(),
        });

        for frame in 0..8u64 {
            let at = now + Duration::from_millis(frame * 16);
            host.advance_frame_at(at).unwrap();
            joiner.advance_frame_at(at).unwrap();
        }

        let rejections = host.take_rejections();
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].0.tick, 1);
        assert!(matches!(
            rejections[0].1,
            Rejection::TooLarge { bytes } if bytes > MAX_PAYLOAD_SIZE
        ));
        assert_eq!(host.next_tick(), 2);
        assert_eq!(host.sim().chat_log.len(), 1);
        assert_eq!(joiner.sim().chat_log.len(), 1);
    }

    #[test]
    fn solo_runs_without_a_peer() {
        let now = Instant::now();
        let (host, _joiner) = sessions(now);
        let mut solo = host.into_solo();
        solo.queue_command(Action::Chat {
            message: "alone".into(),
        });

        for _ in 0..8 {
            solo.advance_frame();
        }
        assert_eq!(solo.sim().tick(), 2);
        assert_eq!(solo.sim().chat_log.len(), 1);
        assert_eq!(solo.team(), Team::A);
    }
}
