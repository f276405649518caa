use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::entity::{NetId, Team};
use super::rules::{BuildingKind, UnitKind};

/// A player intent. Each variant carries exactly the fields it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Action {
    Move {
        unit_ids: Vec<NetId>,
        to: Vec2,
    },
    QueueWaypoint {
        unit_ids: Vec<NetId>,
        to: Vec2,
    },
    Mine {
        worker_ids: Vec<NetId>,
        node_index: usize,
    },
    PlaceBuilding {
        worker_id: NetId,
        building: BuildingKind,
        /// Top-left corner of the footprint.
        at: Vec2,
    },
    TrainUnit {
        building_id: NetId,
        unit: UnitKind,
    },
    Repair {
        worker_ids: Vec<NetId>,
        target: NetId,
    },
    Attack {
        unit_ids: Vec<NetId>,
        target: NetId,
    },
    Chat {
        message: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::QueueWaypoint { .. } => "queue_waypoint",
            Self::Mine { .. } => "mine",
            Self::PlaceBuilding { .. } => "place_building",
            Self::TrainUnit { .. } => "train_unit",
            Self::Repair { .. } => "repair",
            Self::Attack { .. } => "attack",
            Self::Chat { .. } => "chat",
        }
    }
}

/// An action bound to the tick it executes at and its position among the
/// issuing team's commands for that tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub tick: u32,
    pub origin: Team,
    pub seq: u32,
    pub action: Action,
}

impl Command {
    pub fn new(tick: u32, origin: Team, seq: u32, action: Action) -> Self {
        Self {
            tick,
            origin,
            seq,
            action,
        }
    }

    /// Total order used when merging a tick's commands.
    pub fn merge_key(&self) -> (u8, u32) {
        (self.origin.order(), self.seq)
    }
}

/// Everything one team issued for one tick, in issue order. Sent even when
/// empty so the other side knows the tick is complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickBatch {
    pub tick: u32,
    pub origin: Team,
    pub actions: Vec<Action>,
}

impl TickBatch {
    pub fn new(tick: u32, origin: Team) -> Self {
        Self {
            tick,
            origin,
            actions: Vec::new(),
        }
    }

    pub fn with_actions(tick: u32, origin: Team, actions: Vec<Action>) -> Self {
        Self {
            tick,
            origin,
            actions,
        }
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn into_commands(self) -> impl Iterator<Item = Command> {
        let (tick, origin) = (self.tick, self.origin);
        self.actions
            .into_iter()
            .enumerate()
            .map(move |(seq, action)| Command::new(tick, origin, seq as u32, action))
    }
}

/// Flattens a tick's batches into execution order: host's commands first,
/// then the joiner's, each in issue order.
pub fn merge_batches(batches: impl IntoIterator<Item = TickBatch>) -> Vec<Command> {
    let mut commands: Vec<Command> = batches
        .into_iter()
        .flat_map(TickBatch::into_commands)
        .collect();
    commands.sort_by_key(Command::merge_key);
    commands
}
