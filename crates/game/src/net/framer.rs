//! Length-prefixed, checksummed framing of the text-serialized records that
//! travel inside transport payloads.
//!
//! Frame layout: `[len: u32 BE][crc32: u32 BE][len bytes of JSON]`.

use serde::{Deserialize, Serialize};

use super::connection::HandshakeParams;
use crate::simulation::{Action, Team, TickBatch};

pub const FRAME_PREFIX_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Hello { protocol_version: u32 },
    Welcome(HandshakeParams),
    WelcomeAck,
    /// A leading slice of a batch too large for one packet. The tick is
    /// complete only once the closing `TickCommands` arrives.
    TickCommandsPart(TickBatch),
    TickCommands(TickBatch),
    Checksum { tick: u32, value: u32 },
    Leave,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Welcome(_) => "welcome",
            Self::WelcomeAck => "welcome_ack",
            Self::TickCommandsPart(_) => "tick_commands_part",
            Self::TickCommands(_) => "tick_commands",
            Self::Checksum { .. } => "checksum",
            Self::Leave => "leave",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("frame truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("frame declares {declared} body bytes but {available} follow the prefix")]
    LengthMismatch { declared: usize, available: usize },
    #[error("frame checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    Checksum { expected: u32, actual: u32 },
    #[error("malformed record: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("record could not be serialized: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("a single command needs a {size} byte frame, over the {limit} byte limit")]
    Oversized { size: usize, limit: usize },
}

pub fn encode(message: &Message) -> Result<Vec<u8>, FramingError> {
    let body = serde_json::to_vec(message).map_err(FramingError::Encode)?;
    let crc = crc32fast::hash(&body);

    let mut frame = Vec::with_capacity(FRAME_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Frame size of a batch message for `tick` carrying `actions`, without
/// building it.
pub fn batch_frame_size(
    tick: u32,
    origin: Team,
    actions: &[Action],
) -> Result<usize, FramingError> {
    let mut size = batch_overhead(tick, origin)?;
    for (i, action) in actions.iter().enumerate() {
        size += action_size(action)? + usize::from(i > 0);
    }
    Ok(size)
}

/// Splits a batch into messages whose frames each fit in `limit` bytes,
/// keeping action order. Every message but the last is a
/// `TickCommandsPart`; the last is the closing `TickCommands`, sent even for
/// an empty batch.
pub fn split_batch(batch: &TickBatch, limit: usize) -> Result<Vec<Message>, FramingError> {
    let (tick, origin) = (batch.tick, batch.origin);
    let overhead = batch_overhead(tick, origin)?;
    let mut messages = Vec::new();
    let mut current = Vec::new();
    let mut size = overhead;

    for action in &batch.actions {
        let len = action_size(action)?;
        if overhead + len > limit {
            return Err(FramingError::Oversized {
                size: overhead + len,
                limit,
            });
        }
        if !current.is_empty() && size + 1 + len > limit {
            let full = std::mem::take(&mut current);
            messages.push(Message::TickCommandsPart(TickBatch::with_actions(tick, origin, full)));
            size = overhead;
        }
        size += len + usize::from(!current.is_empty());
        current.push(action.clone());
    }

    messages.push(Message::TickCommands(TickBatch::with_actions(tick, origin, current)));
    Ok(messages)
}

/// The longer of the two batch variant names, so the figure holds for both.
fn batch_overhead(tick: u32, origin: Team) -> Result<usize, FramingError> {
    Ok(encode(&Message::TickCommandsPart(TickBatch::new(tick, origin)))?.len())
}

fn action_size(action: &Action) -> Result<usize, FramingError> {
    serde_json::to_vec(action)
        .map(|body| body.len())
        .map_err(FramingError::Encode)
}

pub fn decode(frame: &[u8]) -> Result<Message, FramingError> {
    if frame.len() < FRAME_PREFIX_SIZE {
        return Err(FramingError::Truncated {
            needed: FRAME_PREFIX_SIZE,
            got: frame.len(),
        });
    }

    let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let expected = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let body = &frame[FRAME_PREFIX_SIZE..];

    if body.len() < declared {
        return Err(FramingError::Truncated {
            needed: FRAME_PREFIX_SIZE + declared,
            got: frame.len(),
        });
    }
    if body.len() != declared {
        return Err(FramingError::LengthMismatch {
            declared,
            available: body.len(),
        });
    }

    let actual = crc32fast::hash(body);
    if actual != expected {
        return Err(FramingError::Checksum { expected, actual });
    }

    serde_json::from_slice(body).map_err(FramingError::Malformed)
}
