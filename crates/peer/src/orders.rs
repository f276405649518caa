use glam::Vec2;
use tandem::simulation::{Action, BuildingKind, NetId, SimState, Team, UnitKind};

/// Scripted commands so two unattended peers have something to agree on.
pub struct DemoOrders {
    team: Team,
    stage: usize,
}

impl DemoOrders {
    pub fn new(team: Team) -> Self {
        Self { team, stage: 0 }
    }

    /// The next scripted action, once the simulation has reached its tick.
    pub fn next(&mut self, sim: &SimState) -> Option<Action> {
        let tick = sim.tick();
        let town_center = sim
            .registry
            .buildings()
            .find(|b| b.team == self.team && b.kind == BuildingKind::TownCenter)?;
        let workers: Vec<NetId> = sim
            .registry
            .units()
            .filter(|u| u.team == self.team && u.is_worker())
            .map(|u| u.id)
            .collect();

        let action = match self.stage {
            0 if tick >= 1 => Action::Mine {
                worker_ids: workers,
                node_index: 0,
            },
            1 if tick >= 20 => Action::TrainUnit {
                building_id: town_center.id,
                unit: UnitKind::Worker,
            },
            2 if tick >= 150 => Action::PlaceBuilding {
                worker_id: *workers.first()?,
                building: BuildingKind::Barracks,
                at: town_center.origin + Vec2::new(0.0, 150.0),
            },
            3 if tick >= 200 => Action::Chat {
                message: format!("{} reporting in", self.team),
            },
            _ => return None,
        };
        self.stage += 1;
        Some(action)
    }
}
