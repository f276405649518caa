//! Balance numbers and map layout shared by both peers.

use glam::Vec2;
use serde::{Deserialize, Serialize};

pub const WORLD_SIZE: Vec2 = Vec2::new(10_000.0, 5_400.0);

/// Simulated time covered by one lockstep tick. Fixed, so render rate never
/// leaks into the simulation.
pub const TICK_SECONDS: f32 = 4.0 / 60.0;

pub const STARTING_RESOURCES: u32 = 50;
pub const STARTING_WORKERS: usize = 3;
pub const SUPPLY_PER_TOWN_CENTER: u32 = 15;

pub const MINERAL_NODE_AMOUNT: u32 = 2_500;
pub const MINERAL_NODE_RADIUS: f32 = 16.0;
/// Total growth of a node's box when checking building overlap.
pub const MINERAL_CLEARANCE: f32 = 10.0;

pub const WORKER_CARRY_CAPACITY: u32 = 10;
pub const WORKER_MINE_SECONDS: f32 = 2.0;
pub const WORKER_REPAIR_RATE: f32 = 5.0;
pub const ARRIVAL_EPSILON: f32 = 2.0;

pub const TOWN_CENTER_ZONE_RADIUS: f32 = 500.0;
pub const WATCHGUARD_ZONE_RADIUS: f32 = 500.0;
pub const BUILDING_ZONE_RADIUS: f32 = 100.0;

pub const TEAM_A_TOWN_CENTER: Vec2 = Vec2::new(100.0, 280.0);
pub const TEAM_B_TOWN_CENTER: Vec2 = Vec2::new(8_000.0, 280.0);

/// Offsets from a team's town center. Team B mirrors the x offset.
pub const MINERAL_OFFSETS: [(f32, f32); 10] = [
    (250.0, -80.0),
    (200.0, 220.0),
    (500.0, -80.0),
    (500.0, 520.0),
    (800.0, 120.0),
    (1_000.0, 70.0),
    (800.0, 720.0),
    (1_200.0, -30.0),
    (1_400.0, -130.0),
    (1_500.0, 320.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Worker,
    Soldier,
    Scout,
    Tank,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitStats {
    pub cost: u32,
    pub hp: f32,
    pub speed: f32,
    /// Half-width of the unit's square footprint.
    pub size: f32,
    pub train_seconds: f32,
    pub supply: u32,
    pub fire_rate: f32,
    pub damage: f32,
    pub range: f32,
}

impl UnitKind {
    pub const ALL: [UnitKind; 4] = [Self::Worker, Self::Soldier, Self::Scout, Self::Tank];

    pub const fn stats(self) -> UnitStats {
        match self {
            Self::Worker => UnitStats {
                cost: 15,
                hp: 30.0,
                speed: 160.0,
                size: 12.0,
                train_seconds: 4.0,
                supply: 1,
                fire_rate: 0.0,
                damage: 0.0,
                range: 0.0,
            },
            Self::Soldier => UnitStats {
                cost: 100,
                hp: 100.0,
                speed: 240.0,
                size: 16.0,
                train_seconds: 3.0,
                supply: 1,
                fire_rate: 5.0,
                damage: 10.0,
                range: 16.0 * 7.0,
            },
            Self::Scout => UnitStats {
                cost: 250,
                hp: 100.0,
                speed: 240.0,
                size: 16.0,
                train_seconds: 4.5,
                supply: 1,
                fire_rate: 5.0,
                damage: 2.0,
                range: 200.0,
            },
            Self::Tank => UnitStats {
                cost: 350,
                hp: 500.0,
                speed: 120.0,
                size: 20.0,
                train_seconds: 6.0,
                supply: 2,
                fire_rate: 1.0,
                damage: 34.0,
                range: 20.0 * 7.0,
            },
        }
    }

    pub fn is_combat(self) -> bool {
        self.stats().fire_rate > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingKind {
    TownCenter,
    Barracks,
    Factory,
    Tower,
    Watchguard,
    Radar,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildingStats {
    pub cost: u32,
    pub size: Vec2,
    pub hp: f32,
    pub build_seconds: f32,
    pub fire_rate: f32,
    pub damage: f32,
    pub range: f32,
}

impl BuildingKind {
    pub const fn stats(self) -> BuildingStats {
        match self {
            Self::TownCenter => BuildingStats {
                cost: 100,
                size: Vec2::new(64.0, 64.0),
                hp: 1_000.0,
                build_seconds: 15.0,
                fire_rate: 0.0,
                damage: 0.0,
                range: 0.0,
            },
            Self::Barracks => BuildingStats {
                cost: 50,
                size: Vec2::new(64.0, 64.0),
                hp: 400.0,
                build_seconds: 5.0,
                fire_rate: 0.0,
                damage: 0.0,
                range: 0.0,
            },
            Self::Factory => BuildingStats {
                cost: 80,
                size: Vec2::new(64.0, 64.0),
                hp: 400.0,
                build_seconds: 10.0,
                fire_rate: 0.0,
                damage: 0.0,
                range: 0.0,
            },
            Self::Tower => BuildingStats {
                cost: 300,
                size: Vec2::new(48.0, 48.0),
                hp: 1_000.0,
                build_seconds: 5.0,
                fire_rate: 1.5,
                damage: 25.0,
                range: 200.0,
            },
            Self::Watchguard => BuildingStats {
                cost: 200,
                size: Vec2::new(48.0, 48.0),
                hp: 400.0,
                build_seconds: 3.0,
                fire_rate: 0.0,
                damage: 0.0,
                range: 0.0,
            },
            Self::Radar => BuildingStats {
                cost: 400,
                size: Vec2::new(64.0, 64.0),
                hp: 500.0,
                build_seconds: 16.0,
                fire_rate: 0.0,
                damage: 0.0,
                range: 0.0,
            },
        }
    }

    pub fn can_train(self, unit: UnitKind) -> bool {
        matches!(
            (self, unit),
            (Self::TownCenter, UnitKind::Worker)
                | (Self::Barracks, UnitKind::Soldier)
                | (Self::Factory, UnitKind::Tank | UnitKind::Scout)
        )
    }

    /// Radius around the building's center inside which its team may place
    /// new buildings.
    pub fn zone_radius(self) -> f32 {
        match self {
            Self::TownCenter => TOWN_CENTER_ZONE_RADIUS,
            Self::Watchguard => WATCHGUARD_ZONE_RADIUS,
            _ => BUILDING_ZONE_RADIUS,
        }
    }

    /// The constructing worker is used up.
    pub fn consumes_worker(self) -> bool {
        self == Self::Watchguard
    }
}

/// Axis-aligned box. Touching edges do not count as overlap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn from_origin(origin: Vec2, size: Vec2) -> Self {
        Self {
            min: origin,
            max: origin + size,
        }
    }

    pub fn around(center: Vec2, half_extent: f32) -> Self {
        Self {
            min: center - Vec2::splat(half_extent),
            max: center + Vec2::splat(half_extent),
        }
    }

    /// Grows the box by `amount` in total along each axis.
    pub fn inflate(self, amount: f32) -> Self {
        let half = Vec2::splat(amount / 2.0);
        Self {
            min: self.min - half,
            max: self.max + half,
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x
            && point.x < self.max.x
            && point.y >= self.min.y
            && point.y < self.max.y
    }

    pub fn within_world(&self) -> bool {
        self.min.x >= 0.0
            && self.min.y >= 0.0
            && self.max.x <= WORLD_SIZE.x
            && self.max.y <= WORLD_SIZE.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) / 2.0
    }

    /// Closest point of the box to `point`.
    pub fn clamp(&self, point: Vec2) -> Vec2 {
        point.clamp(self.min, self.max)
    }
}
