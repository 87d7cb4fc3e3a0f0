//! Interactive console commands for the tank client.

use shared::{PeerId, DEFAULT_LAUNCH_FORCE, ENVIRONMENT_ID, MAX_TANK_TYPE};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move { x: f32, y: f32, direction: f32 },
    Fire { direction: f32, force: f32 },
    SelectType(i32),
    Health { current: f32, max: Option<f32> },
    Destroy { destroyer_id: PeerId },
    Spawn {
        x: f32,
        y: f32,
        direction: f32,
        tank_type: i32,
        health: f32,
    },
    Message(String),
    History,
    Status,
    ToggleAuto,
    Help,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("Unknown command: {0}. Type 'help' for the list of commands")]
    Unknown(String),

    #[error("Invalid parameters. Format: {0}")]
    Usage(&'static str),

    #[error("Invalid tank type. Must be between 0 and {max}")]
    InvalidTankType { max: i32 },
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&keyword) = parts.first() else {
            return Err(CommandError::Empty);
        };

        match keyword.to_lowercase().as_str() {
            "move" => {
                const USAGE: &str = "move x y dir";
                Ok(Command::Move {
                    x: arg(&parts, 1, USAGE)?,
                    y: arg(&parts, 2, USAGE)?,
                    direction: arg(&parts, 3, USAGE)?,
                })
            }
            "fire" => {
                const USAGE: &str = "fire dir [force]";
                Ok(Command::Fire {
                    direction: arg(&parts, 1, USAGE)?,
                    force: optional_arg(&parts, 2, USAGE)?.unwrap_or(DEFAULT_LAUNCH_FORCE),
                })
            }
            "tank" => {
                let tank_type: i32 = arg(&parts, 1, "tank n")?;
                if !(0..=MAX_TANK_TYPE).contains(&tank_type) {
                    return Err(CommandError::InvalidTankType { max: MAX_TANK_TYPE });
                }
                Ok(Command::SelectType(tank_type))
            }
            "health" => {
                const USAGE: &str = "health h [max]";
                Ok(Command::Health {
                    current: arg(&parts, 1, USAGE)?,
                    max: optional_arg(&parts, 2, USAGE)?,
                })
            }
            "destroy" => Ok(Command::Destroy {
                destroyer_id: optional_arg(&parts, 1, "destroy [id]")?.unwrap_or(ENVIRONMENT_ID),
            }),
            "spawn" => {
                const USAGE: &str = "spawn x y dir type health";
                Ok(Command::Spawn {
                    x: arg(&parts, 1, USAGE)?,
                    y: arg(&parts, 2, USAGE)?,
                    direction: arg(&parts, 3, USAGE)?,
                    tank_type: arg(&parts, 4, USAGE)?,
                    health: arg(&parts, 5, USAGE)?,
                })
            }
            "msg" => {
                let text = line[keyword.len()..].trim();
                if text.is_empty() {
                    return Err(CommandError::Usage("msg text"));
                }
                Ok(Command::Message(text.to_string()))
            }
            "history" => Ok(Command::History),
            "status" => Ok(Command::Status),
            "auto" => Ok(Command::ToggleAuto),
            "help" => Ok(Command::Help),
            "q" | "quit" => Ok(Command::Quit),
            _ => Err(CommandError::Unknown(keyword.to_string())),
        }
    }
}

fn arg<T: FromStr>(parts: &[&str], index: usize, usage: &'static str) -> Result<T, CommandError> {
    optional_arg(parts, index, usage)?.ok_or(CommandError::Usage(usage))
}

/// Missing is fine; present but unparsable or non-finite is a usage error.
fn optional_arg<T: FromStr>(
    parts: &[&str],
    index: usize,
    usage: &'static str,
) -> Result<Option<T>, CommandError> {
    match parts.get(index) {
        None => Ok(None),
        Some(raw) if raw.parse::<f64>().map_or(false, |v| !v.is_finite()) => {
            Err(CommandError::Usage(usage))
        }
        Some(raw) => raw.parse().map(Some).map_err(|_| CommandError::Usage(usage)),
    }
}

pub fn help_text() -> &'static str {
    "Commands:\n  \
     move x y dir                - move your tank\n  \
     fire dir [force]            - fire a shot (default force 25)\n  \
     tank n                      - select tank type 0-3\n  \
     health h [max]              - report your health\n  \
     destroy [id]                - report your tank destroyed\n  \
     spawn x y dir type health   - respawn your tank\n  \
     msg text                    - send a message to the other players\n  \
     history                     - show recent messages\n  \
     status                      - show connection and group status\n  \
     auto                        - toggle automatic movement\n  \
     q                           - quit"
}
