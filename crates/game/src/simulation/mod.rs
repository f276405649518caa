mod command;
mod entity;
mod execute;
mod registry;
pub mod rules;
mod state;
mod tick;

pub use command::{merge_batches, Action, Command, TickBatch};
pub use entity::{
    Building, ConstructionSite, Entity, EntityKind, EntityView, MineralNode, MiningPhase, NetId,
    Task, Team, Unit,
};
pub use execute::{execute, Rejection, MAX_CHAT_LEN};
pub use registry::Registry;
pub use rules::{BuildingKind, Rect, UnitKind, TICK_SECONDS};
pub use state::{ChatLine, EntitySnapshot, SimState, StateSnapshot, TeamState};
pub use tick::{run_tick, step, TickReport};
