use std::io;
use std::mem;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::endpoint::{bind_udp, DatagramSocket};
use super::framer::{self, Message};
use super::portmap::{try_map_port, PortMapping};
use super::protocol::{Packet, DEFAULT_PORT, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use super::transport::{Transport, TransportConfig, TransportError};
use crate::simulation::Team;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What the host decides and the joiner adopts. Both peers build their
/// starting state from these values alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeParams {
    pub protocol_version: u32,
    pub seed: u64,
    pub host_team: Team,
    pub joiner_team: Team,
    pub first_net_id: u32,
}

impl HandshakeParams {
    pub fn new(seed: u64, first_net_id: u32) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            seed,
            host_team: Team::A,
            joiner_team: Team::B,
            first_net_id,
        }
    }

    pub fn team_for(&self, role: Role) -> Team {
        match role {
            Role::Host => self.host_team,
            Role::Joiner => self.joiner_team,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Joiner,
}

#[derive(Debug, Clone)]
pub struct SetupConfig {
    pub port: u16,
    pub handshake_timeout: Duration,
    /// Host only. Drawn at random when unset.
    pub seed: Option<u64>,
    pub first_net_id: u32,
    pub transport: TransportConfig,
    /// Host only. Ask the gateway to forward `port` over UPnP.
    pub port_mapping: bool,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            seed: None,
            first_net_id: 1,
            transport: TransportConfig::default(),
            port_mapping: true,
        }
    }
}

impl SetupConfig {
    /// Transport limits while the handshake is in progress. The handshake
    /// deadline is the only bound, so retries and silence may last as long.
    fn handshake_transport(&self) -> TransportConfig {
        let interval_ms = self.transport.retransmit_interval.as_millis().max(1);
        let covering = (self.handshake_timeout.as_millis() / interval_ms) as u32 + 1;
        TransportConfig {
            retransmit_interval: self.transport.retransmit_interval,
            max_retransmits: self.transport.max_retransmits.max(covering),
            disconnect_timeout: self.transport.disconnect_timeout.max(self.handshake_timeout),
        }
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no handshake response within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: u32, remote: u32 },
}

/// An established connection to the other peer, ready for a session.
#[derive(Debug)]
pub struct PeerLink<S> {
    pub transport: Transport<S>,
    pub role: Role,
    pub params: HandshakeParams,
    /// Messages that arrived together with the handshake's last step.
    pub early: Vec<Message>,
    /// Kept alive for as long as the link; dropping it unmaps the port.
    pub port_mapping: Option<PortMapping>,
}

impl<S> PeerLink<S> {
    pub fn local_team(&self) -> Team {
        self.params.team_for(self.role)
    }
}

enum HostPhase<S> {
    Listening(S),
    AwaitingAck {
        transport: Transport<S>,
        deadline: Instant,
        early: Vec<Message>,
    },
    Finished,
}

/// Accepts exactly one joiner.
pub struct Host<S> {
    phase: HostPhase<S>,
    config: SetupConfig,
    params: HandshakeParams,
    port_mapping: Option<PortMapping>,
    buffer: [u8; MAX_PACKET_SIZE],
}

impl Host<UdpSocket> {
    /// Binds the configured port on all interfaces and, when enabled, asks
    /// the gateway to forward it.
    pub fn listen(config: SetupConfig) -> Result<Self, SetupError> {
        let socket = bind_udp(("0.0.0.0", config.port))?;
        info!("hosting on UDP {}", socket.local_addr()?);
        let port_mapping = if config.port_mapping {
            try_map_port(config.port)
        } else {
            None
        };

        let mut host = Self::with_socket(socket, config);
        host.port_mapping = port_mapping;
        Ok(host)
    }
}

impl<S: DatagramSocket> Host<S> {
    pub fn with_socket(socket: S, config: SetupConfig) -> Self {
        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().r#gen());
        let params = HandshakeParams::new(seed, config.first_net_id);
        Self {
            phase: HostPhase::Listening(socket),
            config,
            params,
            port_mapping: None,
            buffer: [0u8; MAX_PACKET_SIZE],
        }
    }

    pub fn params(&self) -> &HandshakeParams {
        &self.params
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.phase {
            HostPhase::Listening(socket) => socket.local_addr(),
            HostPhase::AwaitingAck { transport, .. } => transport.local_addr(),
            HostPhase::Finished => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "handshake already finished",
            )),
        }
    }

    /// Advances the handshake without blocking. Returns the link once the
    /// joiner has acknowledged the welcome.
    pub fn poll(&mut self, now: Instant) -> Result<Option<PeerLink<S>>, SetupError> {
        match mem::replace(&mut self.phase, HostPhase::Finished) {
            HostPhase::Listening(socket) => self.listen_for_hello(socket, now),
            HostPhase::AwaitingAck {
                transport,
                deadline,
                early,
            } => self.await_ack(transport, deadline, early, now),
            HostPhase::Finished => Ok(None),
        }
    }

    /// Blocks until a joiner has completed the handshake.
    pub fn accept(mut self) -> Result<PeerLink<S>, SetupError> {
        loop {
            if let Some(link) = self.poll(Instant::now())? {
                return Ok(link);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn listen_for_hello(
        &mut self,
        mut socket: S,
        now: Instant,
    ) -> Result<Option<PeerLink<S>>, SetupError> {
        while let Some((size, from)) = socket.recv_from(&mut self.buffer)? {
            let datagram = self.buffer[..size].to_vec();
            let Some(remote_version) = hello_version(&datagram) else {
                debug!("ignoring {size} byte datagram from {from} while listening");
                continue;
            };

            info!("hello from {from}, protocol {remote_version}");
            let mut transport =
                Transport::new(socket, from, self.config.handshake_transport(), now);
            transport.inject_datagram(&datagram, now)?;
            transport.send(&Message::Welcome(self.params), now)?;
            if remote_version != PROTOCOL_VERSION {
                return Err(SetupError::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    remote: remote_version,
                });
            }

            self.phase = HostPhase::AwaitingAck {
                transport,
                deadline: now + self.config.handshake_timeout,
                early: Vec::new(),
            };
            return Ok(None);
        }

        self.phase = HostPhase::Listening(socket);
        Ok(None)
    }

    fn await_ack(
        &mut self,
        mut transport: Transport<S>,
        deadline: Instant,
        mut early: Vec<Message>,
        now: Instant,
    ) -> Result<Option<PeerLink<S>>, SetupError> {
        let mut acknowledged = false;
        for message in transport.receive(now)? {
            match message {
                Message::WelcomeAck => acknowledged = true,
                Message::Hello { .. } => debug!("repeated hello from {}", transport.peer()),
                other => early.push(other),
            }
        }

        if acknowledged {
            transport.set_config(self.config.transport.clone());
            info!("{} joined, seed {}", transport.peer(), self.params.seed);
            return Ok(Some(PeerLink {
                transport,
                role: Role::Host,
                params: self.params,
                early,
                port_mapping: self.port_mapping.take(),
            }));
        }

        if now >= deadline {
            return Err(SetupError::HandshakeTimeout(self.config.handshake_timeout));
        }
        transport.flush(now)?;
        self.phase = HostPhase::AwaitingAck {
            transport,
            deadline,
            early,
        };
        Ok(None)
    }
}

fn hello_version(datagram: &[u8]) -> Option<u32> {
    let packet = Packet::deserialize(datagram).ok()?;
    if packet.header.is_ack_only() {
        return None;
    }
    match framer::decode(&packet.payload).ok()? {
        Message::Hello { protocol_version } => Some(protocol_version),
        _ => None,
    }
}

/// Connects to a host.
pub struct Joiner<S> {
    transport: Option<Transport<S>>,
    config: SetupConfig,
    deadline: Instant,
}

impl<S: DatagramSocket> Joiner<S> {
    /// Sends the hello; [`Joiner::poll`] then waits for the welcome.
    pub fn with_socket(
        socket: S,
        host: SocketAddr,
        config: SetupConfig,
        now: Instant,
    ) -> Result<Self, SetupError> {
        let mut transport = Transport::new(socket, host, config.handshake_transport(), now);
        transport.send(
            &Message::Hello {
                protocol_version: PROTOCOL_VERSION,
            },
            now,
        )?;
        info!("hello sent to {host}");

        Ok(Self {
            transport: Some(transport),
            deadline: now + config.handshake_timeout,
            config,
        })
    }

    pub fn poll(&mut self, now: Instant) -> Result<Option<PeerLink<S>>, SetupError> {
        let Some(mut transport) = self.transport.take() else {
            return Ok(None);
        };

        let mut welcome = None;
        let mut early = Vec::new();
        for message in transport.receive(now)? {
            match message {
                Message::Welcome(params) => welcome = Some(params),
                other => early.push(other),
            }
        }

        if let Some(params) = welcome {
            if params.protocol_version != PROTOCOL_VERSION {
                return Err(SetupError::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    remote: params.protocol_version,
                });
            }
            transport.send(&Message::WelcomeAck, now)?;
            transport.set_config(self.config.transport.clone());
            info!("joined {}, playing {}", transport.peer(), params.joiner_team);
            return Ok(Some(PeerLink {
                transport,
                role: Role::Joiner,
                params,
                early,
                port_mapping: None,
            }));
        }

        if now >= self.deadline {
            return Err(SetupError::HandshakeTimeout(self.config.handshake_timeout));
        }
        transport.flush(now)?;
        self.transport = Some(transport);
        Ok(None)
    }

    /// Blocks until the host welcomes us or the handshake times out.
    pub fn wait(mut self) -> Result<PeerLink<S>, SetupError> {
        loop {
            if let Some(link) = self.poll(Instant::now())? {
                return Ok(link);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Binds an ephemeral port and completes the handshake with `host`.
pub fn join(host: SocketAddr, config: SetupConfig) -> Result<PeerLink<UdpSocket>, SetupError> {
    let socket = bind_udp("0.0.0.0:0")?;
    Joiner::with_socket(socket, host, config, Instant::now())?.wait()
}
