mod connection;
mod endpoint;
pub mod framer;
mod portmap;
mod protocol;
mod simulator;
mod stats;
mod tracking;
mod transport;

pub use connection::{
    join, HandshakeParams, Host, Joiner, PeerLink, Role, SetupConfig, SetupError,
    HANDSHAKE_TIMEOUT,
};
pub use endpoint::{bind_udp, DatagramSocket};
pub use framer::{FramingError, Message};
pub use portmap::{try_map_port, IgdPortMapper, PortMapError, PortMapper, PortMapping};
pub use protocol::{
    sequence_greater_than, Packet, PacketError, PacketHeader, ACK_ONLY_SEQUENCE,
    DEFAULT_PORT, DISCONNECT_TIMEOUT, HEADER_SIZE, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE,
    MAX_RETRANSMITS, PROTOCOL_VERSION, RETRANSMIT_INTERVAL,
};
pub use simulator::{LossySocket, SimulatedLink, SimulatedSocket};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use tracking::{AckTracker, Arrival, ReceiveTracker, RECEIVE_WINDOW};
pub use transport::{LinkFailure, Transport, TransportConfig, TransportError};
