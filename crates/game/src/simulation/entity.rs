use std::collections::VecDeque;
use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::rules::{BuildingKind, Rect, UnitKind, MINERAL_NODE_AMOUNT, MINERAL_NODE_RADIUS};

/// Cross-peer entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetId(pub u32);

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host plays A, joiner plays B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
}

impl Team {
    /// Position in the merge order of a tick's commands.
    pub fn order(self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    pub fn index(self) -> usize {
        self.order() as usize
    }

    pub fn opponent(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("team A"),
            Self::B => f.write_str("team B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Unit(UnitKind),
    Building(BuildingKind),
}

/// What every simulated entity exposes, whatever its variant.
pub trait EntityView {
    fn net_id(&self) -> NetId;
    fn team(&self) -> Team;
    fn kind(&self) -> EntityKind;
    fn position(&self) -> Vec2;
    fn health(&self) -> f32;
    fn max_health(&self) -> f32;

    /// Distance from the center at which something is touching this entity.
    fn reach(&self) -> f32;

    fn is_alive(&self) -> bool {
        self.health() > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MiningPhase {
    ToNode,
    Waiting,
    Mining { elapsed: f32 },
    Returning { drop_off: NetId },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstructionSite {
    pub building: BuildingKind,
    pub origin: Vec2,
    pub cost: u32,
    /// Seconds of construction done since the worker arrived.
    pub progress: Option<f32>,
}

impl ConstructionSite {
    pub fn footprint(&self) -> Rect {
        Rect::from_origin(self.origin, self.building.stats().size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Task {
    Idle,
    Mining { node: usize, phase: MiningPhase },
    Deploying(ConstructionSite),
    Repairing { target: NetId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: NetId,
    pub team: Team,
    pub kind: UnitKind,
    pub position: Vec2,
    pub hp: f32,
    pub waypoints: VecDeque<Vec2>,
    pub task: Task,
    pub attack_target: Option<NetId>,
    pub fire_cooldown: f32,
    pub carrying: u32,
}

impl Unit {
    pub fn new(id: NetId, team: Team, kind: UnitKind, position: Vec2) -> Self {
        Self {
            id,
            team,
            kind,
            position,
            hp: kind.stats().hp,
            waypoints: VecDeque::new(),
            task: Task::Idle,
            attack_target: None,
            fire_cooldown: 0.0,
            carrying: 0,
        }
    }

    pub fn is_worker(&self) -> bool {
        self.kind == UnitKind::Worker
    }

    pub fn construction_site(&self) -> Option<&ConstructionSite> {
        match &self.task {
            Task::Deploying(site) => Some(site),
            _ => None,
        }
    }

    pub fn footprint(&self) -> Rect {
        Rect::around(self.position, self.kind.stats().size)
    }
}

impl EntityView for Unit {
    fn net_id(&self) -> NetId {
        self.id
    }

    fn team(&self) -> Team {
        self.team
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Unit(self.kind)
    }

    fn position(&self) -> Vec2 {
        self.position
    }

    fn health(&self) -> f32 {
        self.hp
    }

    fn max_health(&self) -> f32 {
        self.kind.stats().hp
    }

    fn reach(&self) -> f32 {
        self.kind.stats().size
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub id: NetId,
    pub team: Team,
    pub kind: BuildingKind,
    /// Top-left corner of the footprint.
    pub origin: Vec2,
    pub hp: f32,
    pub production: VecDeque<UnitKind>,
    pub production_elapsed: f32,
    pub attack_target: Option<NetId>,
    pub fire_cooldown: f32,
}

impl Building {
    pub fn new(id: NetId, team: Team, kind: BuildingKind, origin: Vec2) -> Self {
        Self {
            id,
            team,
            kind,
            origin,
            hp: kind.stats().hp,
            production: VecDeque::new(),
            production_elapsed: 0.0,
            attack_target: None,
            fire_cooldown: 0.0,
        }
    }

    pub fn footprint(&self) -> Rect {
        Rect::from_origin(self.origin, self.kind.stats().size)
    }

    pub fn center(&self) -> Vec2 {
        self.footprint().center()
    }

    /// Where freshly trained units appear.
    pub fn rally_point(&self) -> Vec2 {
        let size = self.kind.stats().size;
        Vec2::new(self.origin.x + size.x / 2.0, self.origin.y + size.y + 30.0)
    }
}

impl EntityView for Building {
    fn net_id(&self) -> NetId {
        self.id
    }

    fn team(&self) -> Team {
        self.team
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Building(self.kind)
    }

    fn position(&self) -> Vec2 {
        self.center()
    }

    fn health(&self) -> f32 {
        self.hp
    }

    fn max_health(&self) -> f32 {
        self.kind.stats().hp
    }

    fn reach(&self) -> f32 {
        self.kind.stats().size.max_element() / 2.0
    }
}

/// Registry entry: a tagged unit or building.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Unit(Unit),
    Building(Building),
}

impl Entity {
    pub fn as_unit(&self) -> Option<&Unit> {
        match self {
            Self::Unit(unit) => Some(unit),
            Self::Building(_) => None,
        }
    }

    pub fn as_unit_mut(&mut self) -> Option<&mut Unit> {
        match self {
            Self::Unit(unit) => Some(unit),
            Self::Building(_) => None,
        }
    }

    pub fn as_building(&self) -> Option<&Building> {
        match self {
            Self::Building(building) => Some(building),
            Self::Unit(_) => None,
        }
    }

    pub fn as_building_mut(&mut self) -> Option<&mut Building> {
        match self {
            Self::Building(building) => Some(building),
            Self::Unit(_) => None,
        }
    }

    fn view(&self) -> &dyn EntityView {
        match self {
            Self::Unit(unit) => unit,
            Self::Building(building) => building,
        }
    }

    pub fn set_health(&mut self, hp: f32) {
        match self {
            Self::Unit(unit) => unit.hp = hp,
            Self::Building(building) => building.hp = hp,
        }
    }
}

impl EntityView for Entity {
    fn net_id(&self) -> NetId {
        self.view().net_id()
    }

    fn team(&self) -> Team {
        self.view().team()
    }

    fn kind(&self) -> EntityKind {
        self.view().kind()
    }

    fn position(&self) -> Vec2 {
        self.view().position()
    }

    fn health(&self) -> f32 {
        self.view().health()
    }

    fn max_health(&self) -> f32 {
        self.view().max_health()
    }

    fn reach(&self) -> f32 {
        self.view().reach()
    }
}

/// Minable deposit, addressed by its index in the owning team's list.
#[derive(Debug, Clone, PartialEq)]
pub struct MineralNode {
    pub position: Vec2,
    pub remaining: u32,
    /// Worker currently extracting; one at a time.
    pub miner: Option<NetId>,
}

impl MineralNode {
    pub fn new(position: Vec2) -> Self {
        Self {
            position,
            remaining: MINERAL_NODE_AMOUNT,
            miner: None,
        }
    }

    pub fn is_depleted(&self) -> bool {
        self.remaining == 0
    }

    pub fn footprint(&self) -> Rect {
        Rect::around(self.position, MINERAL_NODE_RADIUS)
    }

    pub fn extract(&mut self, amount: u32) -> u32 {
        let taken = amount.min(self.remaining);
        self.remaining -= taken;
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_dispatch_by_variant() {
        let unit = Unit::new(NetId(4), Team::B, UnitKind::Tank, Vec2::new(10.0, 20.0));
        let unit = Entity::Unit(unit);
        let building = Entity::Building(Building::new(
            NetId(1),
            Team::A,
            BuildingKind::TownCenter,
            Vec2::new(100.0, 280.0),
        ));

        assert_eq!(unit.kind(), EntityKind::Unit(UnitKind::Tank));
        assert_eq!(unit.position(), Vec2::new(10.0, 20.0));
        assert_eq!(unit.max_health(), 500.0);
        assert_eq!(building.team(), Team::A);
        assert_eq!(building.position(), Vec2::new(132.0, 312.0));
        assert_eq!(building.reach(), 32.0);
        assert!(building.is_alive());
    }

    #[test]
    fn node_extraction_stops_at_empty() {
        let mut node = MineralNode::new(Vec2::ZERO);
        node.remaining = 7;
        assert_eq!(node.extract(10), 7);
        assert!(node.is_depleted());
        assert_eq!(node.extract(10), 0);
    }

    #[test]
    fn merge_order_puts_host_first() {
        assert!(Team::A.order() < Team::B.order());
        assert_eq!(Team::A.opponent(), Team::B);
    }
}
