use glam::Vec2;
use log::debug;
use thiserror::Error;

use super::command::{Action, Command};
use super::entity::{ConstructionSite, EntityView, MiningPhase, NetId, Task, Team};
use super::rules::{BuildingKind, Rect, UnitKind, MINERAL_CLEARANCE, WORLD_SIZE};
use super::state::{ChatLine, SimState};

pub const MAX_CHAT_LEN: usize = 200;

/// Why a command was dropped. Reported to the issuing player only; the
/// other peer reaches the same verdict on its own.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("entity {0} does not exist")]
    UnknownEntity(NetId),
    #[error("entity {0} belongs to the other team")]
    NotOwned(NetId),
    #[error("unit {0} is not a worker")]
    NotAWorker(NetId),
    #[error("command names no units")]
    NoActors,
    #[error("mineral node {0} does not exist")]
    NodeOutOfRange(usize),
    #[error("mineral node {0} is depleted")]
    NodeDepleted(usize),
    #[error("mining requires a town center")]
    NoTownCenter,
    #[error("footprint leaves the world")]
    OutOfBounds,
    #[error("footprint overlaps another structure or deposit")]
    Overlap,
    #[error("site is outside the team's building zone")]
    OutsideZone,
    #[error("costs {cost}, only {available} available")]
    CannotAfford { cost: u32, available: u32 },
    #[error("supply capped at {cap}")]
    SupplyCapped { cap: u32 },
    #[error("{building:?} cannot train {unit:?}")]
    CannotTrain { building: BuildingKind, unit: UnitKind },
    #[error("worker {0} is already deploying")]
    AlreadyDeploying(NetId),
    #[error("{0} is not a valid target")]
    InvalidTarget(NetId),
    #[error("unit {0} cannot attack")]
    NotCombatUnit(NetId),
    #[error("{0} is at full health")]
    FullHealth(NetId),
    #[error("chat message of {len} bytes is too long")]
    ChatTooLong { len: usize },
    /// Never reaches the simulation: the command alone does not fit in a
    /// packet, so it is dropped before sending.
    #[error("command needs {bytes} bytes on the wire")]
    TooLarge { bytes: usize },
}

/// Applies one command to the synchronized state. Either the whole command
/// takes effect or nothing does.
pub fn execute(state: &mut SimState, command: &Command) -> Result<(), Rejection> {
    let team = command.origin;
    match &command.action {
        Action::Move { unit_ids, to } => {
            let units = owned_units(state, team, unit_ids)?;
            let to = to.clamp(Vec2::ZERO, WORLD_SIZE);
            for id in units {
                state.release_task(id);
                if let Some(unit) = state.registry.unit_mut(id) {
                    unit.waypoints.clear();
                    unit.waypoints.push_back(to);
                    unit.attack_target = None;
                }
            }
        }
        Action::QueueWaypoint { unit_ids, to } => {
            let units = owned_units(state, team, unit_ids)?;
            let to = to.clamp(Vec2::ZERO, WORLD_SIZE);
            for id in units {
                state.release_task(id);
                if let Some(unit) = state.registry.unit_mut(id) {
                    unit.waypoints.push_back(to);
                }
            }
        }
        Action::Mine {
            worker_ids,
            node_index,
        } => {
            let workers = owned_workers(state, team, worker_ids)?;
            let node = state
                .team(team)
                .minerals
                .get(*node_index)
                .ok_or(Rejection::NodeOutOfRange(*node_index))?;
            if node.is_depleted() {
                return Err(Rejection::NodeDepleted(*node_index));
            }
            if !state.has_town_center(team) {
                return Err(Rejection::NoTownCenter);
            }

            for id in workers {
                state.release_task(id);
                if let Some(unit) = state.registry.unit_mut(id) {
                    unit.waypoints.clear();
                    unit.attack_target = None;
                    unit.task = Task::Mining {
                        node: *node_index,
                        phase: MiningPhase::ToNode,
                    };
                }
            }
        }
        Action::PlaceBuilding {
            worker_id,
            building,
            at,
        } => {
            let worker = owned_workers(state, team, std::slice::from_ref(worker_id))?[0];
            if state
                .registry
                .unit(worker)
                .is_some_and(|unit| unit.construction_site().is_some())
            {
                return Err(Rejection::AlreadyDeploying(worker));
            }

            let footprint = Rect::from_origin(*at, building.stats().size);
            check_site(state, footprint)?;
            if !state
                .registry
                .units()
                .filter_map(|unit| unit.construction_site())
                .all(|site| !site.footprint().intersects(&footprint))
            {
                return Err(Rejection::Overlap);
            }
            if !in_building_zone(state, team, footprint.center()) {
                return Err(Rejection::OutsideZone);
            }
            let cost = building.stats().cost;
            spend(state, team, cost)?;

            state.release_task(worker);
            if let Some(unit) = state.registry.unit_mut(worker) {
                unit.waypoints.clear();
                unit.attack_target = None;
                unit.task = Task::Deploying(ConstructionSite {
                    building: *building,
                    origin: *at,
                    cost,
                    progress: None,
                });
            }
        }
        Action::TrainUnit { building_id, unit } => {
            let building = state
                .registry
                .building(*building_id)
                .filter(|b| b.is_alive())
                .ok_or(Rejection::UnknownEntity(*building_id))?;
            if building.team != team {
                return Err(Rejection::NotOwned(*building_id));
            }
            if !building.kind.can_train(*unit) {
                return Err(Rejection::CannotTrain {
                    building: building.kind,
                    unit: *unit,
                });
            }
            let cap = state.supply_cap(team);
            if state.supply_used(team) + unit.stats().supply > cap {
                return Err(Rejection::SupplyCapped { cap });
            }
            spend(state, team, unit.stats().cost)?;

            if let Some(building) = state.registry.building_mut(*building_id) {
                building.production.push_back(*unit);
            }
        }
        Action::Repair { worker_ids, target } => {
            let workers = owned_workers(state, team, worker_ids)?;
            let damaged = state
                .registry
                .get(*target)
                .filter(|entity| entity.is_alive())
                .ok_or(Rejection::UnknownEntity(*target))?;
            if damaged.team() != team {
                return Err(Rejection::InvalidTarget(*target));
            }
            if damaged.health() >= damaged.max_health() {
                return Err(Rejection::FullHealth(*target));
            }

            for id in workers.into_iter().filter(|id| id != target) {
                state.release_task(id);
                if let Some(unit) = state.registry.unit_mut(id) {
                    unit.waypoints.clear();
                    unit.attack_target = None;
                    unit.task = Task::Repairing { target: *target };
                }
            }
        }
        Action::Attack { unit_ids, target } => {
            let units = owned_units(state, team, unit_ids)?;
            if let Some(id) = units
                .iter()
                .copied()
                .find(|id| state.registry.unit(*id).is_some_and(|u| !u.kind.is_combat()))
            {
                return Err(Rejection::NotCombatUnit(id));
            }
            let enemy = state
                .registry
                .get(*target)
                .filter(|entity| entity.is_alive())
                .ok_or(Rejection::UnknownEntity(*target))?;
            if enemy.team() == team {
                return Err(Rejection::InvalidTarget(*target));
            }

            for id in units {
                if let Some(unit) = state.registry.unit_mut(id) {
                    unit.waypoints.clear();
                    unit.attack_target = Some(*target);
                }
            }
        }
        Action::Chat { message } => {
            if message.len() > MAX_CHAT_LEN {
                return Err(Rejection::ChatTooLong { len: message.len() });
            }
            let tick = state.tick();
            state.chat_log.push(ChatLine {
                tick,
                team,
                message: message.clone(),
            });
        }
    }

    debug!("{team} {} at tick {} applied", command.action.name(), command.tick);
    Ok(())
}

/// Living units of `team`, deduplicated, in the order given.
fn owned_units(state: &SimState, team: Team, ids: &[NetId]) -> Result<Vec<NetId>, Rejection> {
    let mut units = Vec::with_capacity(ids.len());
    for &id in ids {
        let unit = state
            .registry
            .unit(id)
            .filter(|unit| unit.is_alive())
            .ok_or(Rejection::UnknownEntity(id))?;
        if unit.team != team {
            return Err(Rejection::NotOwned(id));
        }
        if !units.contains(&id) {
            units.push(id);
        }
    }
    if units.is_empty() {
        return Err(Rejection::NoActors);
    }
    Ok(units)
}

fn owned_workers(state: &SimState, team: Team, ids: &[NetId]) -> Result<Vec<NetId>, Rejection> {
    let units = owned_units(state, team, ids)?;
    match units
        .iter()
        .find(|id| state.registry.unit(**id).is_some_and(|unit| !unit.is_worker()))
    {
        Some(id) => Err(Rejection::NotAWorker(*id)),
        None => Ok(units),
    }
}

/// Bounds and collision rules that also hold when construction finishes.
pub(crate) fn check_site(state: &SimState, footprint: Rect) -> Result<(), Rejection> {
    if !footprint.within_world() {
        return Err(Rejection::OutOfBounds);
    }
    let blocked_by_building = state
        .registry
        .buildings()
        .filter(|building| building.is_alive())
        .any(|building| building.footprint().intersects(&footprint));
    let blocked_by_node = state
        .teams
        .iter()
        .flat_map(|team| team.minerals.iter())
        .filter(|node| !node.is_depleted())
        .any(|node| node.footprint().inflate(MINERAL_CLEARANCE).intersects(&footprint));
    if blocked_by_building || blocked_by_node {
        return Err(Rejection::Overlap);
    }
    Ok(())
}

fn in_building_zone(state: &SimState, team: Team, point: Vec2) -> bool {
    state
        .registry
        .buildings()
        .filter(|building| building.team == team && building.is_alive())
        .any(|building| building.center().distance(point) <= building.kind.zone_radius())
}

fn spend(state: &mut SimState, team: Team, cost: u32) -> Result<(), Rejection> {
    let available = state.team(team).resources;
    if cost > available {
        return Err(Rejection::CannotAfford { cost, available });
    }
    state.team_mut(team).resources = available - cost;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::rules::{STARTING_RESOURCES, TEAM_A_TOWN_CENTER};

    const TOWN_CENTER_A: NetId = NetId(1);
    const WORKER_A: NetId = NetId(2);
    const WORKER_B: NetId = NetId(6);

    fn command(origin: Team, action: Action) -> Command {
        Command::new(0, origin, 0, action)
    }

    fn place(worker: NetId, building: BuildingKind, at: Vec2) -> Action {
        Action::PlaceBuilding {
            worker_id: worker,
            building,
            at,
        }
    }

    #[test]
    fn move_replaces_waypoints() {
        let mut state = SimState::new(1, 1);
        let action = Action::Move {
            unit_ids: vec![WORKER_A, WORKER_A],
            to: Vec2::new(400.0, 400.0),
        };

        execute(&mut state, &command(Team::A, action)).unwrap();

        let unit = state.registry.unit(WORKER_A).unwrap();
        assert_eq!(unit.waypoints.len(), 1);
        assert_eq!(unit.waypoints[0], Vec2::new(400.0, 400.0));
    }

    #[test]
    fn foreign_units_are_rejected_without_effect() {
        let mut state = SimState::new(1, 1);
        let action = Action::Move {
            unit_ids: vec![WORKER_A, WORKER_B],
            to: Vec2::new(400.0, 400.0),
        };

        let result = execute(&mut state, &command(Team::A, action));

        assert_eq!(result, Err(Rejection::NotOwned(WORKER_B)));
        assert!(state.registry.unit(WORKER_A).unwrap().waypoints.is_empty());
    }

    #[test]
    fn placement_spends_at_command_time() {
        let mut state = SimState::new(1, 1);
        let at = TEAM_A_TOWN_CENTER + Vec2::new(0.0, 150.0);

        let barracks = command(Team::A, place(WORKER_A, BuildingKind::Barracks, at));
        execute(&mut state, &barracks).unwrap();

        assert_eq!(state.team(Team::A).resources, STARTING_RESOURCES - 50);
        let site = state.registry.unit(WORKER_A).unwrap().construction_site().copied();
        assert_eq!(site.map(|s| s.origin), Some(at));
    }

    #[test]
    fn placement_rules() {
        let mut state = SimState::new(1, 1);
        let place_a = |building, at| command(Team::A, place(WORKER_A, building, at));

        assert_eq!(
            execute(&mut state, &place_a(BuildingKind::Barracks, Vec2::new(-10.0, 100.0))),
            Err(Rejection::OutOfBounds)
        );
        assert_eq!(
            execute(
                &mut state,
                &place_a(BuildingKind::Barracks, TEAM_A_TOWN_CENTER + Vec2::new(20.0, 20.0))
            ),
            Err(Rejection::Overlap)
        );
        assert_eq!(
            execute(&mut state, &place_a(BuildingKind::Barracks, Vec2::new(3_000.0, 300.0))),
            Err(Rejection::OutsideZone)
        );
        assert_eq!(
            execute(
                &mut state,
                &place_a(BuildingKind::Tower, TEAM_A_TOWN_CENTER + Vec2::new(0.0, 150.0))
            ),
            Err(Rejection::CannotAfford {
                cost: 300,
                available: STARTING_RESOURCES
            })
        );
        assert_eq!(state.team(Team::A).resources, STARTING_RESOURCES);
    }

    #[test]
    fn placement_next_to_mineral_needs_clearance() {
        let mut state = SimState::new(1, 1);
        let node = state.team(Team::A).minerals[0].position;
        // Clear of the node's own box, but inside the clearance margin.
        let at = Vec2::new(node.x + 16.0 + 2.0, node.y - 8.0);

        assert_eq!(
            execute(&mut state, &command(Team::A, place(WORKER_A, BuildingKind::Barracks, at))),
            Err(Rejection::Overlap)
        );
    }

    #[test]
    fn pending_sites_block_each_other() {
        let mut state = SimState::new(1, 1);
        state.team_mut(Team::A).resources = 500;
        let at = TEAM_A_TOWN_CENTER + Vec2::new(0.0, 150.0);

        let barracks = command(Team::A, place(WORKER_A, BuildingKind::Barracks, at));
        execute(&mut state, &barracks).unwrap();
        assert_eq!(
            execute(
                &mut state,
                &command(
                    Team::A,
                    place(NetId(3), BuildingKind::Barracks, at + Vec2::new(30.0, 0.0))
                )
            ),
            Err(Rejection::Overlap)
        );
        assert_eq!(
            execute(
                &mut state,
                &command(
                    Team::A,
                    place(WORKER_A, BuildingKind::Barracks, at + Vec2::new(200.0, 0.0))
                )
            ),
            Err(Rejection::AlreadyDeploying(WORKER_A))
        );
    }

    #[test]
    fn moving_a_deploying_worker_refunds() {
        let mut state = SimState::new(1, 1);
        let at = TEAM_A_TOWN_CENTER + Vec2::new(0.0, 150.0);
        let barracks = command(Team::A, place(WORKER_A, BuildingKind::Barracks, at));
        execute(&mut state, &barracks).unwrap();

        let action = Action::Move {
            unit_ids: vec![WORKER_A],
            to: Vec2::new(500.0, 500.0),
        };
        execute(&mut state, &command(Team::A, action)).unwrap();

        assert_eq!(state.team(Team::A).resources, STARTING_RESOURCES);
        assert_eq!(state.registry.unit(WORKER_A).unwrap().task, Task::Idle);
    }

    #[test]
    fn training_checks_building_cost_and_supply() {
        let mut state = SimState::new(1, 1);
        let train = |unit| {
            command(
                Team::A,
                Action::TrainUnit {
                    building_id: TOWN_CENTER_A,
                    unit,
                },
            )
        };

        assert_eq!(
            execute(&mut state, &train(UnitKind::Tank)),
            Err(Rejection::CannotTrain {
                building: BuildingKind::TownCenter,
                unit: UnitKind::Tank
            })
        );
        execute(&mut state, &train(UnitKind::Worker)).unwrap();
        assert_eq!(state.team(Team::A).resources, STARTING_RESOURCES - 15);
        assert_eq!(state.supply_used(Team::A), 4);

        state.team_mut(Team::A).resources = 10_000;
        for _ in 0..11 {
            execute(&mut state, &train(UnitKind::Worker)).unwrap();
        }
        assert_eq!(
            execute(&mut state, &train(UnitKind::Worker)),
            Err(Rejection::SupplyCapped { cap: 15 })
        );
    }

    #[test]
    fn mining_assigns_workers() {
        let mut state = SimState::new(1, 1);
        let mine = |node_index| {
            command(
                Team::A,
                Action::Mine {
                    worker_ids: vec![WORKER_A, NetId(3)],
                    node_index,
                },
            )
        };

        assert_eq!(execute(&mut state, &mine(99)), Err(Rejection::NodeOutOfRange(99)));
        execute(&mut state, &mine(0)).unwrap();
        assert_eq!(
            state.registry.unit(NetId(3)).unwrap().task,
            Task::Mining {
                node: 0,
                phase: MiningPhase::ToNode
            }
        );

        assert_eq!(
            execute(
                &mut state,
                &command(
                    Team::A,
                    Action::Mine {
                        worker_ids: vec![TOWN_CENTER_A],
                        node_index: 0
                    }
                )
            ),
            Err(Rejection::UnknownEntity(TOWN_CENTER_A))
        );
    }

    #[test]
    fn attack_requires_combat_units_and_an_enemy() {
        let mut state = SimState::new(1, 1);
        let soldier = state.spawn_unit(Team::A, UnitKind::Soldier, Vec2::new(300.0, 300.0));
        let attack = |unit_ids, target| command(Team::A, Action::Attack { unit_ids, target });

        assert_eq!(
            execute(&mut state, &attack(vec![WORKER_A], WORKER_B)),
            Err(Rejection::NotCombatUnit(WORKER_A))
        );
        assert_eq!(
            execute(&mut state, &attack(vec![soldier], WORKER_A)),
            Err(Rejection::InvalidTarget(WORKER_A))
        );
        execute(&mut state, &attack(vec![soldier], WORKER_B)).unwrap();
        assert_eq!(state.registry.unit(soldier).unwrap().attack_target, Some(WORKER_B));
    }

    #[test]
    fn repair_needs_damage() {
        let mut state = SimState::new(1, 1);
        let repair = command(
            Team::A,
            Action::Repair {
                worker_ids: vec![WORKER_A],
                target: TOWN_CENTER_A,
            },
        );

        assert_eq!(execute(&mut state, &repair), Err(Rejection::FullHealth(TOWN_CENTER_A)));
        if let Some(town_center) = state.registry.building_mut(TOWN_CENTER_A) {
            town_center.hp = 500.0;
        }
        execute(&mut state, &repair).unwrap();
        assert_eq!(
            state.registry.unit(WORKER_A).unwrap().task,
            Task::Repairing {
                target: TOWN_CENTER_A
            }
        );
    }

    #[test]
    fn chat_is_logged_with_its_tick() {
        let mut state = SimState::new(1, 1);
        let chat = |message: String| command(Team::B, Action::Chat { message });

        execute(&mut state, &chat("gl hf".into())).unwrap();
        assert_eq!(
            execute(&mut state, &chat("x".repeat(MAX_CHAT_LEN + 1))),
            Err(Rejection::ChatTooLong {
                len: MAX_CHAT_LEN + 1
            })
        );
        assert_eq!(state.chat_log.len(), 1);
        assert_eq!(state.chat_log[0].team, Team::B);
    }
}
