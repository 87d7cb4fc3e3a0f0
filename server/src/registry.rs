//! Authoritative tank records, one per active peer.
//!
//! All mutations go through the `apply_*` operations so that health always
//! stays clamped and the destroyed flag always agrees with health. Each
//! operation returns a snapshot of the record after the change, which the
//! caller uses to build its notifications.

use crate::error::RegistryError;
use shared::{clamp_health, PeerId, TankInfo, ENVIRONMENT_ID};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Registry {
    tanks: HashMap<PeerId, TankInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any record that already exists under the same id.
    pub fn insert(&mut self, tank: TankInfo) -> Option<TankInfo> {
        self.tanks.insert(tank.id, tank)
    }

    pub fn remove(&mut self, id: PeerId) -> Option<TankInfo> {
        self.tanks.remove(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<&TankInfo> {
        self.tanks.get(&id)
    }

    /// Ids in ascending order, so fan-out order is stable.
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.tanks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn ids_except(&self, exclude: PeerId) -> Vec<PeerId> {
        self.ids().into_iter().filter(|id| *id != exclude).collect()
    }

    /// Records in ascending id order.
    pub fn tanks(&self) -> Vec<&TankInfo> {
        let mut tanks: Vec<&TankInfo> = self.tanks.values().collect();
        tanks.sort_unstable_by_key(|tank| tank.id);
        tanks
    }

    pub fn len(&self) -> usize {
        self.tanks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tanks.is_empty()
    }

    fn tank_mut(&mut self, id: PeerId) -> Result<&mut TankInfo, RegistryError> {
        self.tanks
            .get_mut(&id)
            .ok_or_else(|| RegistryError::not_found(id))
    }

    pub fn apply_move(
        &mut self,
        id: PeerId,
        x: f32,
        y: f32,
        direction: f32,
    ) -> Result<TankInfo, RegistryError> {
        let tank = self.tank_mut(id)?;
        tank.set_transform(x, y, direction);
        Ok(tank.clone())
    }

    pub fn apply_type_select(&mut self, id: PeerId, tank_type: i32) -> Result<TankInfo, RegistryError> {
        let tank = self.tank_mut(id)?;
        tank.tank_type = tank_type;
        Ok(tank.clone())
    }

    /// Peer-reported health. A value above zero revives a destroyed tank.
    pub fn apply_health_update(
        &mut self,
        id: PeerId,
        current: f32,
        max: f32,
    ) -> Result<TankInfo, RegistryError> {
        let tank = self.tank_mut(id)?;
        tank.set_health(current, max);
        Ok(tank.clone())
    }

    pub fn apply_destroy(&mut self, id: PeerId, destroyer_id: PeerId) -> Result<TankInfo, RegistryError> {
        let tank = self.tank_mut(id)?;
        tank.mark_destroyed(destroyer_id);
        Ok(tank.clone())
    }

    pub fn apply_spawn(
        &mut self,
        id: PeerId,
        x: f32,
        y: f32,
        direction: f32,
        tank_type: i32,
        initial_health: f32,
    ) -> Result<TankInfo, RegistryError> {
        let tank = self.tank_mut(id)?;
        tank.respawn(x, y, direction, tank_type, initial_health);
        Ok(tank.clone())
    }

    /// Operator damage. Reaching zero destroys the tank with the
    /// environment as destroyer.
    pub fn apply_damage(&mut self, id: PeerId, amount: f32) -> Result<TankInfo, RegistryError> {
        let tank = self.tank_mut(id)?;
        if tank.destroyed {
            return Err(RegistryError::already_destroyed(id));
        }

        tank.current_health = clamp_health(tank.current_health - amount, tank.max_health);
        if tank.current_health <= 0.0 {
            tank.mark_destroyed(ENVIRONMENT_ID);
        }
        Ok(tank.clone())
    }

    pub fn apply_heal(&mut self, id: PeerId, amount: f32) -> Result<TankInfo, RegistryError> {
        let tank = self.tank_mut(id)?;
        if tank.destroyed {
            return Err(RegistryError::already_destroyed(id));
        }

        tank.current_health = clamp_health(tank.current_health + amount, tank.max_health);
        if tank.current_health <= 0.0 {
            tank.mark_destroyed(ENVIRONMENT_ID);
        }
        Ok(tank.clone())
    }

    /// Operator respawn: new position, full health, direction and type kept.
    pub fn respawn_at(&mut self, id: PeerId, x: f32, y: f32) -> Result<TankInfo, RegistryError> {
        let tank = self.tank_mut(id)?;
        let (direction, tank_type, max_health) = (tank.direction, tank.tank_type, tank.max_health);
        tank.respawn(x, y, direction, tank_type, max_health);
        Ok(tank.clone())
    }
}
