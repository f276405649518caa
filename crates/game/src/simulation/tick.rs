use glam::Vec2;
use log::debug;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::command::Command;
use super::entity::{ConstructionSite, Entity, EntityView, MiningPhase, NetId, Task, Team, Unit};
use super::execute::{check_site, execute, Rejection};
use super::rules::{
    BuildingKind, Rect, ARRIVAL_EPSILON, MINERAL_NODE_RADIUS, TICK_SECONDS, WORKER_CARRY_CAPACITY,
    WORKER_MINE_SECONDS, WORKER_REPAIR_RATE, WORLD_SIZE,
};
use super::state::SimState;

/// Extra distance at which a worker can repair.
const REPAIR_REACH: f32 = 10.0;
/// Spread of freshly trained units around the rally point.
const SPAWN_JITTER: f32 = 20.0;

#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: u32,
    pub applied: usize,
    pub rejected: Vec<(Command, Rejection)>,
}

/// Executes one lockstep tick: the merged commands in order, then one
/// fixed step of world simulation.
pub fn run_tick(state: &mut SimState, commands: Vec<Command>) -> TickReport {
    let mut report = TickReport {
        tick: state.tick(),
        ..Default::default()
    };

    for command in commands {
        match execute(state, &command) {
            Ok(()) => report.applied += 1,
            Err(reason) => {
                debug!(
                    "tick {}: {} from {} rejected: {reason}",
                    report.tick,
                    command.action.name(),
                    command.origin
                );
                report.rejected.push((command, reason));
            }
        }
    }

    step(state);
    state.finish_tick();
    report
}

/// Advances every entity by [`TICK_SECONDS`], in id order.
pub fn step(state: &mut SimState) {
    let dt = TICK_SECONDS;
    let mut rng = state.tick_rng();

    for id in state.registry.ids() {
        match state.registry.get(id) {
            Some(Entity::Building(_)) => update_building(state, id, dt, &mut rng),
            Some(Entity::Unit(_)) => update_unit(state, id, dt),
            None => {}
        }
    }

    remove_dead(state);
}

fn update_building(state: &mut SimState, id: NetId, dt: f32, rng: &mut ChaCha8Rng) {
    let Some(mut building) = state.registry.building(id).cloned() else {
        return;
    };
    if !building.is_alive() {
        return;
    }

    if let Some(&kind) = building.production.front() {
        building.production_elapsed += dt;
        if building.production_elapsed >= kind.stats().train_seconds {
            building.production.pop_front();
            building.production_elapsed = 0.0;
            let jitter = Vec2::new(
                rng.gen_range(-SPAWN_JITTER..=SPAWN_JITTER),
                rng.gen_range(-SPAWN_JITTER..=SPAWN_JITTER),
            );
            let spot = free_spot(state, building.rally_point() + jitter, kind.stats().size);
            let spawned = state.spawn_unit(building.team, kind, spot);
            debug!("{} trained {kind:?} {spawned}", building.id);
        }
    }

    let stats = building.kind.stats();
    if stats.fire_rate > 0.0 {
        building.fire_cooldown = (building.fire_cooldown - dt).max(0.0);
        let center = building.center();
        let current = building
            .attack_target
            .filter(|&target| enemy_in_range(state, building.team, center, stats.range, target));
        building.attack_target =
            current.or_else(|| nearest_enemy(state, building.team, center, stats.range));
        if let Some(target) = building.attack_target {
            if building.fire_cooldown <= 0.0 {
                hit(state, target, stats.damage);
                building.fire_cooldown = 1.0 / stats.fire_rate;
            }
        }
    }

    if let Some(slot) = state.registry.building_mut(id) {
        *slot = building;
    }
}

fn update_unit(state: &mut SimState, id: NetId, dt: f32) {
    let Some(mut unit) = state.registry.unit(id).cloned() else {
        return;
    };
    if !unit.is_alive() {
        return;
    }

    if unit.kind.is_combat() {
        engage(state, &mut unit, dt);
    }

    let travel = unit.kind.stats().speed * dt;
    if let Some(&waypoint) = unit.waypoints.front() {
        if move_toward(&mut unit.position, waypoint, travel) {
            unit.waypoints.pop_front();
        }
    } else {
        match unit.task {
            Task::Idle => {}
            Task::Mining { node, phase } => mine(state, &mut unit, node, phase, dt),
            Task::Deploying(site) => construct(state, &mut unit, site, dt),
            Task::Repairing { target } => repair(state, &mut unit, target, dt),
        }
    }

    if let Some(slot) = state.registry.unit_mut(id) {
        *slot = unit;
    }
}

/// Fires at the unit's target, chasing it when idle. Idle units pick the
/// nearest enemy in range on their own.
fn engage(state: &mut SimState, unit: &mut Unit, dt: f32) {
    let stats = unit.kind.stats();
    unit.fire_cooldown = (unit.fire_cooldown - dt).max(0.0);

    if unit.attack_target.is_none() && unit.waypoints.is_empty() {
        unit.attack_target = nearest_enemy(state, unit.team, unit.position, stats.range);
    }
    let Some(target) = unit.attack_target else {
        return;
    };
    let Some((position, reach)) = state
        .registry
        .get(target)
        .filter(|enemy| enemy.is_alive() && enemy.team() != unit.team)
        .map(|enemy| (enemy.position(), enemy.reach()))
    else {
        unit.attack_target = None;
        return;
    };

    if unit.position.distance(position) <= stats.range + reach {
        if unit.fire_cooldown <= 0.0 {
            hit(state, target, stats.damage);
            unit.fire_cooldown = 1.0 / stats.fire_rate;
        }
    } else if unit.waypoints.is_empty() {
        move_toward(&mut unit.position, position, stats.speed * dt);
    }
}

fn mine(state: &mut SimState, unit: &mut Unit, node: usize, phase: MiningPhase, dt: f32) {
    let team = unit.team;
    let stats = unit.kind.stats();
    let Some((node_position, depleted, claimant)) = state
        .team(team)
        .minerals
        .get(node)
        .map(|deposit| (deposit.position, deposit.is_depleted(), deposit.miner))
    else {
        unit.task = Task::Idle;
        return;
    };

    let next = match phase {
        MiningPhase::ToNode | MiningPhase::Waiting => {
            if depleted {
                unit.task = Task::Idle;
                return;
            }
            if phase == MiningPhase::ToNode {
                move_toward(&mut unit.position, node_position, stats.speed * dt);
            }
            let arrived = unit.position.distance(node_position)
                <= MINERAL_NODE_RADIUS + stats.size + ARRIVAL_EPSILON;
            if !arrived {
                MiningPhase::ToNode
            } else if claimant.is_none_or(|miner| miner == unit.id) {
                if let Some(deposit) = state.team_mut(team).minerals.get_mut(node) {
                    deposit.miner = Some(unit.id);
                }
                MiningPhase::Mining { elapsed: 0.0 }
            } else {
                MiningPhase::Waiting
            }
        }
        MiningPhase::Mining { elapsed } => {
            let elapsed = elapsed + dt;
            if elapsed < WORKER_MINE_SECONDS {
                MiningPhase::Mining { elapsed }
            } else {
                if let Some(deposit) = state.team_mut(team).minerals.get_mut(node) {
                    unit.carrying += deposit.extract(WORKER_CARRY_CAPACITY);
                    deposit.miner = None;
                }
                match nearest_town_center(state, team, unit.position) {
                    Some((drop_off, _)) => MiningPhase::Returning { drop_off },
                    None => {
                        unit.task = Task::Idle;
                        return;
                    }
                }
            }
        }
        MiningPhase::Returning { drop_off } => {
            let depot = state
                .registry
                .building(drop_off)
                .filter(|building| building.is_alive())
                .map(|building| (building.id, building.footprint()))
                .or_else(|| nearest_town_center(state, team, unit.position));
            let Some((drop_off, footprint)) = depot else {
                unit.task = Task::Idle;
                return;
            };

            if !touching(footprint, unit) {
                move_toward(&mut unit.position, footprint.center(), stats.speed * dt);
            }
            if touching(footprint, unit) {
                state.team_mut(team).resources += unit.carrying;
                unit.carrying = 0;
                if depleted {
                    unit.task = Task::Idle;
                    return;
                }
                MiningPhase::ToNode
            } else {
                MiningPhase::Returning { drop_off }
            }
        }
    };

    unit.task = Task::Mining { node, phase: next };
}

fn construct(state: &mut SimState, unit: &mut Unit, mut site: ConstructionSite, dt: f32) {
    let footprint = site.footprint();
    let Some(progress) = site.progress else {
        move_toward(&mut unit.position, footprint.center(), unit.kind.stats().speed * dt);
        if touching(footprint, unit) {
            site.progress = Some(0.0);
        }
        unit.task = Task::Deploying(site);
        return;
    };

    let progress = progress + dt;
    if progress < site.building.stats().build_seconds {
        site.progress = Some(progress);
        unit.task = Task::Deploying(site);
        return;
    }

    unit.task = Task::Idle;
    match check_site(state, footprint) {
        Ok(()) => {
            let id = state.spawn_building(unit.team, site.building, site.origin);
            debug!("{} finished {:?} {id}", unit.team, site.building);
            if site.building.consumes_worker() {
                unit.hp = 0.0;
            }
        }
        Err(reason) => {
            state.team_mut(unit.team).resources += site.cost;
            debug!("{} {:?} site no longer valid, refunded: {reason}", unit.team, site.building);
        }
    }
}

fn repair(state: &mut SimState, unit: &mut Unit, target: NetId, dt: f32) {
    let Some((position, reach, hp, max_hp)) = state
        .registry
        .get(target)
        .filter(|entity| entity.is_alive() && entity.team() == unit.team)
        .map(|entity| (entity.position(), entity.reach(), entity.health(), entity.max_health()))
    else {
        unit.task = Task::Idle;
        return;
    };
    if hp >= max_hp {
        unit.task = Task::Idle;
        return;
    }

    let stats = unit.kind.stats();
    if unit.position.distance(position) > reach + stats.size + REPAIR_REACH {
        move_toward(&mut unit.position, position, stats.speed * dt);
        return;
    }

    let healed = (hp + WORKER_REPAIR_RATE * dt).min(max_hp);
    if let Some(entity) = state.registry.get_mut(target) {
        entity.set_health(healed);
    }
    if healed >= max_hp {
        unit.task = Task::Idle;
    }
}

fn remove_dead(state: &mut SimState) {
    let dead: Vec<NetId> = state
        .registry
        .iter()
        .filter(|entity| !entity.is_alive())
        .map(EntityView::net_id)
        .collect();

    for id in dead {
        state.release_task(id);
        if let Some(entity) = state.registry.remove(id) {
            debug!("{} {:?} of {} destroyed", id, entity.kind(), entity.team());
        }
    }
}

/// Moves at most `distance` toward `target`. Returns whether it got there.
fn move_toward(position: &mut Vec2, target: Vec2, distance: f32) -> bool {
    let offset = target - *position;
    let remaining = offset.length();
    if remaining <= distance {
        *position = target;
        true
    } else {
        *position += offset / remaining * distance;
        false
    }
}

fn touching(footprint: Rect, unit: &Unit) -> bool {
    footprint
        .inflate(2.0 * (unit.kind.stats().size + ARRIVAL_EPSILON))
        .contains(unit.position)
}

fn hit(state: &mut SimState, target: NetId, damage: f32) {
    if let Some(entity) = state.registry.get_mut(target) {
        let hp = (entity.health() - damage).max(0.0);
        entity.set_health(hp);
    }
}

fn enemy_in_range(state: &SimState, team: Team, from: Vec2, range: f32, target: NetId) -> bool {
    state.registry.get(target).is_some_and(|enemy| {
        enemy.is_alive()
            && enemy.team() != team
            && from.distance(enemy.position()) <= range + enemy.reach()
    })
}

/// Closest living enemy within range; ties go to the lower id.
fn nearest_enemy(state: &SimState, team: Team, from: Vec2, range: f32) -> Option<NetId> {
    state
        .registry
        .iter()
        .filter(|enemy| enemy.is_alive() && enemy.team() != team)
        .map(|enemy| (enemy.net_id(), from.distance(enemy.position()) - enemy.reach()))
        .filter(|&(_, gap)| gap <= range)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
}

fn nearest_town_center(state: &SimState, team: Team, from: Vec2) -> Option<(NetId, Rect)> {
    state
        .registry
        .buildings()
        .filter(|b| b.team == team && b.kind == BuildingKind::TownCenter && b.is_alive())
        .map(|b| (b.id, b.footprint(), b.center().distance(from)))
        .min_by(|a, b| a.2.total_cmp(&b.2))
        .map(|(id, footprint, _)| (id, footprint))
}

/// First spot along the row from `preferred` not taken by another unit.
fn free_spot(state: &SimState, preferred: Vec2, size: f32) -> Vec2 {
    let stride = size * 2.0 + 4.0;
    let mut spot = preferred;
    for _ in 0..16 {
        let footprint = Rect::around(spot, size);
        if !state
            .registry
            .units()
            .any(|unit| unit.is_alive() && unit.footprint().intersects(&footprint))
        {
            break;
        }
        spot.x += stride;
    }
    spot.clamp(Vec2::ZERO, WORLD_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::command::Action;
    use crate::simulation::rules::{UnitKind, STARTING_RESOURCES, TEAM_A_TOWN_CENTER};

    const WORKER_A: NetId = NetId(2);

    fn advance(state: &mut SimState, ticks: u32) {
        for _ in 0..ticks {
            run_tick(state, Vec::new());
        }
    }

    fn issue(state: &mut SimState, origin: Team, action: Action) -> TickReport {
        let command = Command::new(state.tick(), origin, 0, action);
        run_tick(state, vec![command])
    }

    fn team_buildings(state: &SimState, team: Team, kind: BuildingKind) -> usize {
        state
            .registry
            .buildings()
            .filter(|b| b.team == team && b.kind == kind)
            .count()
    }

    #[test]
    fn rejected_commands_are_reported() {
        let mut state = SimState::new(5, 1);
        let report = issue(
            &mut state,
            Team::B,
            Action::Move {
                unit_ids: vec![WORKER_A],
                to: Vec2::ZERO,
            },
        );

        assert_eq!(report.tick, 0);
        assert_eq!(report.applied, 0);
        assert_eq!(report.rejected[0].1, Rejection::NotOwned(WORKER_A));
        assert_eq!(state.tick(), 1);
    }

    #[test]
    fn units_walk_their_waypoints() {
        let mut state = SimState::new(5, 1);
        let start = state.registry.unit(WORKER_A).unwrap().position;
        let destination = start + Vec2::new(160.0, 0.0);

        issue(
            &mut state,
            Team::A,
            Action::Move {
                unit_ids: vec![WORKER_A],
                to: destination,
            },
        );
        let after_one = state.registry.unit(WORKER_A).unwrap().position;
        assert!(after_one.x > start.x && after_one.x < destination.x);

        advance(&mut state, 20);
        let unit = state.registry.unit(WORKER_A).unwrap();
        assert_eq!(unit.position, destination);
        assert!(unit.waypoints.is_empty());
    }

    #[test]
    fn training_spawns_near_the_rally_point() {
        let mut state = SimState::new(5, 1);
        issue(
            &mut state,
            Team::A,
            Action::TrainUnit {
                building_id: NetId(1),
                unit: UnitKind::Worker,
            },
        );
        advance(&mut state, 70);

        let rally = state.registry.building(NetId(1)).unwrap().rally_point();
        let trained = state.registry.unit(NetId(9)).unwrap();
        assert_eq!(trained.team, Team::A);
        assert!(
            trained.position.y >= rally.y - SPAWN_JITTER
                && trained.position.y <= rally.y + SPAWN_JITTER
        );
        assert!(state.registry.building(NetId(1)).unwrap().production.is_empty());
    }

    #[test]
    fn mined_minerals_reach_the_stockpile() {
        let mut state = SimState::new(5, 1);
        issue(
            &mut state,
            Team::A,
            Action::Mine {
                worker_ids: vec![WORKER_A],
                node_index: 0,
            },
        );
        advance(&mut state, 150);

        let resources = state.team(Team::A).resources;
        let carrying = state.registry.unit(WORKER_A).unwrap().carrying;
        let remaining = state.team(Team::A).minerals[0].remaining;
        assert!(resources > STARTING_RESOURCES);
        assert_eq!(resources - STARTING_RESOURCES + carrying, 2_500 - remaining);
    }

    #[test]
    fn only_one_worker_mines_a_node_at_a_time() {
        let mut state = SimState::new(5, 1);
        issue(
            &mut state,
            Team::A,
            Action::Mine {
                worker_ids: vec![WORKER_A, NetId(3)],
                node_index: 0,
            },
        );

        for _ in 0..200 {
            run_tick(&mut state, Vec::new());
            let mining = state
                .registry
                .units()
                .filter(|u| {
                    matches!(
                        u.task,
                        Task::Mining {
                            phase: MiningPhase::Mining { .. },
                            ..
                        }
                    )
                })
                .count();
            assert!(mining <= 1);
        }
    }

    #[test]
    fn construction_finishes_after_build_time() {
        let mut state = SimState::new(5, 1);
        let at = TEAM_A_TOWN_CENTER + Vec2::new(0.0, 150.0);
        issue(
            &mut state,
            Team::A,
            Action::PlaceBuilding {
                worker_id: WORKER_A,
                building: BuildingKind::Barracks,
                at,
            },
        );

        advance(&mut state, 40);
        assert_eq!(team_buildings(&state, Team::A, BuildingKind::Barracks), 0);
        advance(&mut state, 60);

        assert_eq!(team_buildings(&state, Team::A, BuildingKind::Barracks), 1);
        assert_eq!(state.registry.unit(WORKER_A).unwrap().task, Task::Idle);
        assert_eq!(state.team(Team::A).resources, 0);
    }

    #[test]
    fn watchguard_uses_up_its_worker() {
        let mut state = SimState::new(5, 1);
        state.team_mut(Team::A).resources = 200;
        issue(
            &mut state,
            Team::A,
            Action::PlaceBuilding {
                worker_id: WORKER_A,
                building: BuildingKind::Watchguard,
                at: TEAM_A_TOWN_CENTER + Vec2::new(0.0, 150.0),
            },
        );
        advance(&mut state, 80);

        assert_eq!(team_buildings(&state, Team::A, BuildingKind::Watchguard), 1);
        assert!(state.registry.get(WORKER_A).is_none());
    }

    #[test]
    fn blocked_site_is_refunded_on_completion() {
        let mut state = SimState::new(5, 1);
        let at = TEAM_A_TOWN_CENTER + Vec2::new(0.0, 150.0);
        issue(
            &mut state,
            Team::A,
            Action::PlaceBuilding {
                worker_id: WORKER_A,
                building: BuildingKind::Barracks,
                at,
            },
        );
        state.spawn_building(Team::B, BuildingKind::Radar, at + Vec2::new(10.0, 10.0));
        advance(&mut state, 100);

        assert_eq!(team_buildings(&state, Team::A, BuildingKind::Barracks), 0);
        assert_eq!(state.team(Team::A).resources, STARTING_RESOURCES);
    }

    #[test]
    fn towers_shoot_intruders() {
        let mut state = SimState::new(5, 1);
        let tower = state.spawn_building(Team::A, BuildingKind::Tower, Vec2::new(1_000.0, 1_000.0));
        let soldier = state.spawn_unit(Team::B, UnitKind::Soldier, Vec2::new(1_100.0, 1_024.0));

        advance(&mut state, 45);

        assert!(state.registry.get(soldier).is_none());
        let tower = state.registry.building(tower).unwrap();
        assert!(tower.hp < tower.kind.stats().hp);
    }

    #[test]
    fn repair_restores_health() {
        let mut state = SimState::new(5, 1);
        if let Some(town_center) = state.registry.building_mut(NetId(1)) {
            town_center.hp = 990.0;
        }
        issue(
            &mut state,
            Team::A,
            Action::Repair {
                worker_ids: vec![WORKER_A],
                target: NetId(1),
            },
        );
        advance(&mut state, 60);

        assert_eq!(state.registry.building(NetId(1)).unwrap().hp, 1_000.0);
        assert_eq!(state.registry.unit(WORKER_A).unwrap().task, Task::Idle);
    }

    #[test]
    fn identical_inputs_stay_identical() {
        let run = || {
            let mut state = SimState::new(11, 1);
            issue(
                &mut state,
                Team::A,
                Action::TrainUnit {
                    building_id: NetId(1),
                    unit: UnitKind::Worker,
                },
            );
            issue(
                &mut state,
                Team::B,
                Action::Mine {
                    worker_ids: vec![NetId(6), NetId(7)],
                    node_index: 2,
                },
            );
            advance(&mut state, 120);
            state.checksum()
        };

        assert_eq!(run(), run());
    }
}
