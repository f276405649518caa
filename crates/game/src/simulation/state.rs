use glam::Vec2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rkyv::{rancor, Archive, Deserialize, Serialize};

use super::entity::{Building, Entity, EntityView, MineralNode, NetId, Task, Team, Unit};
use super::registry::Registry;
use super::rules::{
    BuildingKind, UnitKind, MINERAL_OFFSETS, STARTING_RESOURCES, STARTING_WORKERS,
    SUPPLY_PER_TOWN_CENTER, TEAM_A_TOWN_CENTER, TEAM_B_TOWN_CENTER,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub tick: u32,
    pub team: Team,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamState {
    pub team: Team,
    pub resources: u32,
    pub minerals: Vec<MineralNode>,
}

/// The replicated simulation. Identical on both peers after every tick.
#[derive(Debug, Clone)]
pub struct SimState {
    tick: u32,
    seed: u64,
    pub registry: Registry,
    pub teams: [TeamState; 2],
    pub chat_log: Vec<ChatLine>,
}

impl SimState {
    /// Builds the shared starting position: one town center, its workers and
    /// mineral field per team. Ids are assigned in a fixed order.
    pub fn new(seed: u64, first_net_id: u32) -> Self {
        let mut state = Self {
            tick: 0,
            seed,
            registry: Registry::new(first_net_id),
            teams: [Team::A, Team::B].map(|team| TeamState {
                team,
                resources: STARTING_RESOURCES,
                minerals: mineral_field(team),
            }),
            chat_log: Vec::new(),
        };

        for team in [Team::A, Team::B] {
            let origin = match team {
                Team::A => TEAM_A_TOWN_CENTER,
                Team::B => TEAM_B_TOWN_CENTER,
            };
            let town_center = state.spawn_building(team, BuildingKind::TownCenter, origin);
            let rally = state
                .registry
                .building(town_center)
                .map(Building::rally_point)
                .unwrap_or(origin);
            for i in 0..STARTING_WORKERS {
                state.spawn_unit(team, UnitKind::Worker, rally + Vec2::new(i as f32 * 25.0, 0.0));
            }
        }

        state
    }

    /// Ticks executed so far; also the number of the next tick to execute.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub(crate) fn finish_tick(&mut self) {
        self.tick += 1;
    }

    /// Randomness for the current tick. Both peers draw the same sequence
    /// for the same tick regardless of wall-clock time.
    pub fn tick_rng(&self) -> ChaCha8Rng {
        let mixed = self.seed ^ (self.tick as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        ChaCha8Rng::seed_from_u64(mixed)
    }

    pub fn team(&self, team: Team) -> &TeamState {
        &self.teams[team.index()]
    }

    pub fn team_mut(&mut self, team: Team) -> &mut TeamState {
        &mut self.teams[team.index()]
    }

    pub fn spawn_unit(&mut self, team: Team, kind: UnitKind, position: Vec2) -> NetId {
        self.registry
            .insert_with(|id| Entity::Unit(Unit::new(id, team, kind, position)))
    }

    pub fn spawn_building(&mut self, team: Team, kind: BuildingKind, origin: Vec2) -> NetId {
        self.registry
            .insert_with(|id| Entity::Building(Building::new(id, team, kind, origin)))
    }

    /// Drops whatever the unit was doing. A mining claim is released and an
    /// unfinished construction is refunded.
    pub fn release_task(&mut self, id: NetId) {
        let Some(unit) = self.registry.unit_mut(id) else {
            return;
        };
        let team = unit.team;
        match std::mem::replace(&mut unit.task, Task::Idle) {
            Task::Mining { node, .. } => {
                if let Some(node) = self.team_mut(team).minerals.get_mut(node) {
                    if node.miner == Some(id) {
                        node.miner = None;
                    }
                }
            }
            Task::Deploying(site) => self.team_mut(team).resources += site.cost,
            Task::Idle | Task::Repairing { .. } => {}
        }
    }

    pub fn has_town_center(&self, team: Team) -> bool {
        self.registry
            .buildings()
            .any(|b| b.team == team && b.kind == BuildingKind::TownCenter && b.is_alive())
    }

    /// Supply in use: living units plus everything queued for training.
    pub fn supply_used(&self, team: Team) -> u32 {
        let fielded: u32 = self
            .registry
            .units()
            .filter(|u| u.team == team && u.is_alive())
            .map(|u| u.kind.stats().supply)
            .sum();
        let queued: u32 = self
            .registry
            .buildings()
            .filter(|b| b.team == team)
            .flat_map(|b| b.production.iter())
            .map(|kind| kind.stats().supply)
            .sum();
        fielded + queued
    }

    pub fn supply_cap(&self, team: Team) -> u32 {
        let town_centers = self
            .registry
            .buildings()
            .filter(|b| b.team == team && b.kind == BuildingKind::TownCenter && b.is_alive())
            .count() as u32;
        town_centers * SUPPLY_PER_TOWN_CENTER
    }

    /// Point-in-time copy for recorders and checksums.
    pub fn snapshot(&self) -> StateSnapshot {
        let mut entities = Vec::new();
        for entity in self.registry.iter() {
            let (kind, task) = match entity {
                Entity::Unit(unit) => (unit.kind as u8, task_code(&unit.task)),
                Entity::Building(building) => {
                    (16 + building.kind as u8, building.production.len() as u8)
                }
            };
            let position = entity.position();
            entities.push(EntitySnapshot {
                net_id: entity.net_id().0,
                team: entity.team().order(),
                kind,
                position: [position.x, position.y],
                hp: entity.health(),
                task,
            });
        }

        StateSnapshot {
            tick: self.tick,
            seed: self.seed,
            next_net_id: self.registry.next_id().0,
            resources: [self.teams[0].resources, self.teams[1].resources],
            minerals: self
                .teams
                .iter()
                .flat_map(|team| team.minerals.iter().map(|node| node.remaining))
                .collect(),
            entities,
        }
    }

    /// CRC-32 of the archived snapshot; equal on both peers while in sync.
    pub fn checksum(&self) -> u32 {
        match self.snapshot().to_bytes() {
            Ok(bytes) => crc32fast::hash(&bytes),
            // Archiving plain data cannot fail; fall back to hashing the debug form.
            Err(_) => crc32fast::hash(format!("{:?}", self.snapshot()).as_bytes()),
        }
    }
}

fn mineral_field(team: Team) -> Vec<MineralNode> {
    MINERAL_OFFSETS
        .iter()
        .map(|&(dx, dy)| match team {
            Team::A => TEAM_A_TOWN_CENTER + Vec2::new(dx, dy),
            Team::B => TEAM_B_TOWN_CENTER + Vec2::new(-dx, dy),
        })
        .map(MineralNode::new)
        .collect()
}

fn task_code(task: &Task) -> u8 {
    match task {
        Task::Idle => 0,
        Task::Mining { .. } => 1,
        Task::Deploying(_) => 2,
        Task::Repairing { .. } => 3,
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntitySnapshot {
    pub net_id: u32,
    pub team: u8,
    pub kind: u8,
    pub position: [f32; 2],
    pub hp: f32,
    pub task: u8,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct StateSnapshot {
    pub tick: u32,
    pub seed: u64,
    pub next_net_id: u32,
    pub resources: [u32; 2],
    pub minerals: Vec<u32>,
    pub entities: Vec<EntitySnapshot>,
}

impl StateSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, rancor::Error> {
        rkyv::to_bytes::<rancor::Error>(self).map(|aligned| aligned.into_vec())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, rancor::Error> {
        rkyv::from_bytes::<Self, rancor::Error>(data)
    }
}
