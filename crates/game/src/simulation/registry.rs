use super::entity::{Building, Entity, EntityView, NetId, Unit};

/// Entity storage keyed by [`NetId`].
///
/// Identifiers are handed out sequentially from a starting value both peers
/// agree on at handshake. Allocation only happens during shared setup and
/// tick execution, so the counters on both sides never drift. Slots are
/// indexed by `id - first_id`, giving constant-time lookup and id-ordered
/// iteration. Identifiers are never reused.
#[derive(Debug, Clone)]
pub struct Registry {
    first_id: u32,
    slots: Vec<Option<Entity>>,
}

impl Registry {
    pub fn new(first_id: u32) -> Self {
        Self {
            first_id,
            slots: Vec::new(),
        }
    }

    pub fn first_id(&self) -> u32 {
        self.first_id
    }

    /// The identifier the next insertion will receive.
    pub fn next_id(&self) -> NetId {
        NetId(self.first_id + self.slots.len() as u32)
    }

    pub fn insert_with(&mut self, build: impl FnOnce(NetId) -> Entity) -> NetId {
        let id = self.next_id();
        self.slots.push(Some(build(id)));
        id
    }

    fn slot(&self, id: NetId) -> Option<usize> {
        id.0.checked_sub(self.first_id).map(|offset| offset as usize)
    }

    pub fn get(&self, id: NetId) -> Option<&Entity> {
        self.slots.get(self.slot(id)?)?.as_ref()
    }

    pub fn get_mut(&mut self, id: NetId) -> Option<&mut Entity> {
        let slot = self.slot(id)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn unit(&self, id: NetId) -> Option<&Unit> {
        self.get(id).and_then(Entity::as_unit)
    }

    pub fn unit_mut(&mut self, id: NetId) -> Option<&mut Unit> {
        self.get_mut(id).and_then(Entity::as_unit_mut)
    }

    pub fn building(&self, id: NetId) -> Option<&Building> {
        self.get(id).and_then(Entity::as_building)
    }

    pub fn building_mut(&mut self, id: NetId) -> Option<&mut Building> {
        self.get_mut(id).and_then(Entity::as_building_mut)
    }

    pub fn remove(&mut self, id: NetId) -> Option<Entity> {
        let slot = self.slot(id)?;
        self.slots.get_mut(slot)?.take()
    }

    /// Live entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.slots.iter().flatten()
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.iter().filter_map(Entity::as_unit)
    }

    pub fn buildings(&self) -> impl Iterator<Item = &Building> {
        self.iter().filter_map(Entity::as_building)
    }

    /// Snapshot of live ids, for passes that mutate while walking.
    pub fn ids(&self) -> Vec<NetId> {
        self.iter().map(EntityView::net_id).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
