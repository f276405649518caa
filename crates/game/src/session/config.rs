use std::time::Duration;

pub const DEFAULT_CADENCE_FRAMES: u32 = 4;
pub const STALL_TIMEOUT: Duration = Duration::from_secs(5);
pub const CHECKSUM_INTERVAL: u32 = 15;
/// How long a departed session keeps retransmitting its goodbye.
pub const LEAVE_LINGER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rendered frames per lockstep tick.
    pub cadence_frames: u32,
    /// How long a missing batch may hold up the simulation.
    pub stall_timeout: Duration,
    /// Executed ticks between state checksum exchanges. Zero disables them.
    pub checksum_interval: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cadence_frames: DEFAULT_CADENCE_FRAMES,
            stall_timeout: STALL_TIMEOUT,
            checksum_interval: CHECKSUM_INTERVAL,
        }
    }
}
