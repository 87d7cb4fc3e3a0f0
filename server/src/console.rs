//! Operator console for the running server.
//!
//! Commands are typed on the server's stdin:
//!
//! | command                | effect                                          |
//! |------------------------|-------------------------------------------------|
//! | `status`               | list connected tanks                            |
//! | `health [id]`          | health of one tank or all                       |
//! | `damage <id> <amount>` | subtract health, destroying at zero             |
//! | `heal <id> <amount>`   | add health up to max                            |
//! | `respawn <id> <x> <y>` | revive at a position with full health           |
//! | `q`                    | stop the server                                 |
//!
//! Damage, heal and respawn are broadcast to every active peer, the target
//! included.

use crate::channel::MessageSink;
use crate::error::{CommandError, RegistryError};
use crate::game::{health_packet, GameServer};
use log::info;
use shared::{Packet, PeerId, TankInfo, ENVIRONMENT_ID};
use std::fmt::Write;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Status,
    Health(Option<PeerId>),
    Damage { id: PeerId, amount: f32 },
    Heal { id: PeerId, amount: f32 },
    Respawn { id: PeerId, x: f32, y: f32 },
    Quit,
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&keyword) = parts.first() else {
            return Err(CommandError::Empty);
        };

        match keyword.to_lowercase().as_str() {
            "q" | "quit" => Ok(OperatorCommand::Quit),
            "status" => Ok(OperatorCommand::Status),
            "health" => match parts.get(1) {
                None => Ok(OperatorCommand::Health(None)),
                Some(raw) => raw
                    .parse()
                    .map(|id| OperatorCommand::Health(Some(id)))
                    .map_err(|_| CommandError::InvalidId(raw.to_string())),
            },
            "damage" => {
                const USAGE: &str = "damage id amount";
                Ok(OperatorCommand::Damage {
                    id: arg(&parts, 1, USAGE)?,
                    amount: finite_arg(&parts, 2, USAGE)?,
                })
            }
            "heal" => {
                const USAGE: &str = "heal id amount";
                Ok(OperatorCommand::Heal {
                    id: arg(&parts, 1, USAGE)?,
                    amount: finite_arg(&parts, 2, USAGE)?,
                })
            }
            "respawn" => {
                const USAGE: &str = "respawn id x y";
                Ok(OperatorCommand::Respawn {
                    id: arg(&parts, 1, USAGE)?,
                    x: finite_arg(&parts, 2, USAGE)?,
                    y: finite_arg(&parts, 3, USAGE)?,
                })
            }
            _ => Err(CommandError::Unknown(keyword.to_string())),
        }
    }
}

fn arg<T: FromStr>(parts: &[&str], index: usize, usage: &'static str) -> Result<T, CommandError> {
    parts
        .get(index)
        .and_then(|raw| raw.parse().ok())
        .ok_or(CommandError::Usage(usage))
}

/// Like [`arg`], but `nan` and `inf` count as bad input.
fn finite_arg(parts: &[&str], index: usize, usage: &'static str) -> Result<f32, CommandError> {
    arg::<f32>(parts, index, usage)
        .ok()
        .filter(|value| value.is_finite())
        .ok_or(CommandError::Usage(usage))
}

pub fn help_text() -> &'static str {
    "Server commands:\n  \
     status                - list connected tanks\n  \
     health [id]           - show tank health\n  \
     damage <id> <amount>  - damage a tank\n  \
     heal <id> <amount>    - heal a tank\n  \
     respawn <id> <x> <y>  - respawn a tank\n  \
     q                     - stop the server"
}

impl<S: MessageSink> GameServer<S> {
    /// Runs an operator command and returns the text to show the operator.
    pub fn execute(&mut self, command: OperatorCommand) -> String {
        match command {
            OperatorCommand::Status => self.status_report(),
            OperatorCommand::Health(None) => self.health_report(),
            OperatorCommand::Health(Some(id)) => match self.registry.get(id) {
                Some(tank) => format!("Tank {} health: {}", id, tank.health_label()),
                None => RegistryError::not_found(id).to_string(),
            },
            OperatorCommand::Damage { id, amount } => match self.damage_tank(id, amount) {
                Ok(tank) if tank.destroyed => {
                    format!("Applied {} damage to tank {}. Tank destroyed", amount, id)
                }
                Ok(tank) => format!(
                    "Applied {} damage to tank {}. New health: {}",
                    amount,
                    id,
                    tank.health_label()
                ),
                Err(e) => e.to_string(),
            },
            OperatorCommand::Heal { id, amount } => match self.heal_tank(id, amount) {
                Ok(tank) if tank.destroyed => {
                    format!("Healed tank {} by {}. Tank destroyed", id, amount)
                }
                Ok(tank) => format!(
                    "Healed tank {} by {}. New health: {}",
                    id,
                    amount,
                    tank.health_label()
                ),
                Err(e) => e.to_string(),
            },
            OperatorCommand::Respawn { id, x, y } => match self.respawn_tank(id, x, y) {
                Ok(tank) => format!(
                    "Respawned tank {} at ({}, {}) with {} health",
                    id, tank.x, tank.y, tank.max_health
                ),
                Err(e) => e.to_string(),
            },
            OperatorCommand::Quit => "Server stopping".to_string(),
        }
    }

    pub fn damage_tank(&mut self, id: PeerId, amount: f32) -> Result<TankInfo, RegistryError> {
        let tank = self.registry.apply_damage(id, amount)?;
        info!("Operator damaged tank {} by {}", id, amount);
        self.announce_health(&tank);
        Ok(tank)
    }

    /// A negative amount that reaches zero destroys the tank like damage.
    pub fn heal_tank(&mut self, id: PeerId, amount: f32) -> Result<TankInfo, RegistryError> {
        let tank = self.registry.apply_heal(id, amount)?;
        info!("Operator healed tank {} by {}", id, amount);
        self.announce_health(&tank);
        Ok(tank)
    }

    /// Sends `HealthUpdated`, then `TankDestroyed` if the change was fatal,
    /// to every active peer.
    fn announce_health(&mut self, tank: &TankInfo) {
        let health = health_packet(tank);
        let destroyed = Packet::TankDestroyed {
            tank_id: tank.id,
            destroyer_id: ENVIRONMENT_ID,
        };
        for peer in self.registry.ids() {
            self.sink.send_to(peer, health.clone());
            if tank.destroyed {
                self.sink.send_to(peer, destroyed.clone());
            }
        }
    }

    pub fn respawn_tank(&mut self, id: PeerId, x: f32, y: f32) -> Result<TankInfo, RegistryError> {
        let tank = self.registry.respawn_at(id, x, y)?;
        info!("Operator respawned tank {} at ({}, {})", id, x, y);
        self.broadcast_all(&Packet::TankSpawned {
            tank_id: id,
            x: tank.x,
            y: tank.y,
            direction: tank.direction,
            tank_type: tank.tank_type,
            initial_health: tank.max_health,
        });
        Ok(tank)
    }

    pub fn status_report(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "========== Connected Clients ==========");
        let _ = writeln!(report, "Total: {} clients", self.registry.len());
        for tank in self.registry.tanks() {
            let addr = self
                .sessions
                .get(tank.id)
                .map(|session| session.addr.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let _ = writeln!(
                report,
                "Client ID: {}, Address: {}, Position: ({:.1}, {:.1}), TankType: {}, Health: {}",
                tank.id,
                addr,
                tank.x,
                tank.y,
                tank.tank_type,
                tank.health_label()
            );
        }
        match self.groups.current() {
            Some(group) => {
                let _ = write!(
                    report,
                    "Relay group: {} ({} members)",
                    group.id,
                    group.len()
                );
            }
            None => report.push_str("Relay group: none"),
        }
        report
    }

    pub fn health_report(&self) -> String {
        if self.registry.is_empty() {
            return "No connected tanks".to_string();
        }
        self.registry
            .tanks()
            .into_iter()
            .map(|tank| format!("Tank {} health: {}", tank.id, tank.health_label()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
