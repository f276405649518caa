pub mod net;
pub mod session;
pub mod simulation;

pub use net::{
    join, DatagramSocket, HandshakeParams, Host, Joiner, Message, NetworkStats,
    PacketLossSimulation, PeerLink, Role, SetupConfig, SetupError, SimulatedLink, Transport,
    TransportConfig, TransportError, DEFAULT_PORT, PROTOCOL_VERSION,
};
pub use session::{FrameReport, Session, SessionConfig, SessionError, SessionState, Solo};
pub use simulation::{
    Action, BuildingKind, Command, NetId, Rejection, SimState, StateSnapshot, Team, TickBatch,
    UnitKind,
};
