use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub type PeerId = u32;
pub type GroupId = u32;

/// Must match between peers or the server refuses the connection.
pub const PROTOCOL_VERSION: u128 = 0x3ae3_3249_ecc6_4980_bc5d_7b0a_999c_0739;
pub const SERVER_PORT: u16 = 33334;
pub const SERVER_HOST: &str = "127.0.0.1";

/// Destroyer id meaning "environment / no peer".
pub const ENVIRONMENT_ID: PeerId = 0;
pub const UNSELECTED_TANK_TYPE: i32 = -1;
pub const MAX_TANK_TYPE: i32 = 3;
pub const DEFAULT_MAX_HEALTH: f32 = 100.0;
pub const SPAWN_AREA: f32 = 100.0;
pub const DEFAULT_LAUNCH_FORCE: f32 = 25.0;
pub const FIRE_HEIGHT: f32 = 1.0;
pub const MAX_MESSAGE_HISTORY: usize = 10;
pub const MAX_FRAME_LEN: usize = 16 * 1024;

pub const GROUP_INFO_PREFIX: &str = "P2P_GROUP_INFO:";
pub const RELAY_PREFIX: &str = "RELAY_FROM_";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct FireOrigin {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl FireOrigin {
    /// Maps a 2-D ground position into the 3-D firing space.
    pub fn from_ground(x: f32, y: f32) -> Self {
        Self {
            x,
            y: FIRE_HEIGHT,
            z: y,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        protocol_version: u128,
    },
    Connected {
        client_id: PeerId,
        tank: TankInfo,
    },
    Disconnect,
    Disconnected {
        reason: String,
    },

    Move {
        x: f32,
        y: f32,
        direction: f32,
    },
    Fire {
        direction: f32,
        force: f32,
        origin: FireOrigin,
    },
    SelectType {
        tank_type: i32,
    },
    HealthUpdate {
        current: f32,
        max: f32,
    },
    Destroyed {
        destroyer_id: PeerId,
    },
    Spawn {
        x: f32,
        y: f32,
        direction: f32,
        tank_type: i32,
        initial_health: f32,
    },
    RelayMessage {
        text: String,
    },
    GroupMessage {
        group_id: GroupId,
        text: String,
    },

    PositionUpdated {
        tank_id: PeerId,
        x: f32,
        y: f32,
        direction: f32,
    },
    BulletSpawned {
        tank_id: PeerId,
        shooter_id: PeerId,
        x: f32,
        y: f32,
        direction: f32,
        force: f32,
        origin: FireOrigin,
    },
    PlayerJoined {
        tank_id: PeerId,
        x: f32,
        y: f32,
        tank_type: i32,
    },
    PlayerLeft {
        tank_id: PeerId,
    },
    HealthUpdated {
        tank_id: PeerId,
        current: f32,
        max: f32,
    },
    TankDestroyed {
        tank_id: PeerId,
        destroyer_id: PeerId,
    },
    TankSpawned {
        tank_id: PeerId,
        x: f32,
        y: f32,
        direction: f32,
        tank_type: i32,
        initial_health: f32,
    },
    PeerMessage {
        from: PeerId,
        text: String,
    },
    GroupFormed {
        group_id: GroupId,
        members: Vec<PeerId>,
    },
    GroupDisbanded {
        group_id: GroupId,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TankInfo {
    pub id: PeerId,
    pub x: f32,
    pub y: f32,
    pub direction: f32,
    pub tank_type: i32,
    pub current_health: f32,
    pub max_health: f32,
    pub destroyed: bool,
    pub destroyed_by: PeerId,
}

impl TankInfo {
    pub fn new(id: PeerId, x: f32, y: f32) -> Self {
        Self {
            id,
            x,
            y,
            direction: 0.0,
            tank_type: UNSELECTED_TANK_TYPE,
            current_health: DEFAULT_MAX_HEALTH,
            max_health: DEFAULT_MAX_HEALTH,
            destroyed: false,
            destroyed_by: ENVIRONMENT_ID,
        }
    }

    pub fn set_transform(&mut self, x: f32, y: f32, direction: f32) {
        self.x = x;
        self.y = y;
        self.direction = direction;
    }

    /// Overwrites both health values. Health at or below zero destroys the
    /// tank, anything above zero clears an earlier destruction. A maximum
    /// that is not a positive number leaves the old maximum in place.
    pub fn set_health(&mut self, current: f32, max: f32) {
        let was_destroyed = self.destroyed;
        self.max_health = self.usable_max(max);
        let max = self.max_health;
        self.current_health = clamp_health(current, max);
        self.destroyed = self.current_health <= 0.0;

        if !(was_destroyed && self.destroyed) {
            self.destroyed_by = ENVIRONMENT_ID;
        }
    }

    pub fn mark_destroyed(&mut self, destroyer_id: PeerId) {
        self.current_health = 0.0;
        self.destroyed = true;
        self.destroyed_by = destroyer_id;
    }

    pub fn respawn(
        &mut self,
        x: f32,
        y: f32,
        direction: f32,
        tank_type: i32,
        initial_health: f32,
    ) {
        self.set_transform(x, y, direction);
        self.tank_type = tank_type;
        self.max_health = self.usable_max(initial_health);
        self.current_health = self.max_health;
        self.destroyed = false;
        self.destroyed_by = ENVIRONMENT_ID;
    }

    fn usable_max(&self, max: f32) -> f32 {
        if max.is_finite() && max > 0.0 {
            max
        } else {
            self.max_health
        }
    }

    pub fn health_label(&self) -> String {
        if self.destroyed {
            "DESTROYED".to_string()
        } else {
            format!("{}/{}", self.current_health, self.max_health)
        }
    }
}

/// Clamps `current` into `[0, max]`; NaN and negative maxima collapse to 0.
pub fn clamp_health(current: f32, max: f32) -> f32 {
    if current.is_nan() {
        return 0.0;
    }
    current.clamp(0.0, max.max(0.0))
}

pub fn describe_destroyer(destroyer_id: PeerId) -> String {
    if destroyer_id == ENVIRONMENT_ID {
        "by environment".to_string()
    } else {
        format!("by tank {}", destroyer_id)
    }
}

/// Server-side contract: one method per client request kind.
///
/// Each method returns `true` when the request was applied and fanned out,
/// `false` when it was dropped (unknown sender, stale group, ...).
pub trait RequestHandler {
    fn on_move(&mut self, from: PeerId, x: f32, y: f32, direction: f32) -> bool;
    fn on_fire(&mut self, from: PeerId, direction: f32, force: f32, origin: FireOrigin) -> bool;
    fn on_select_type(&mut self, from: PeerId, tank_type: i32) -> bool;
    fn on_health_update(&mut self, from: PeerId, current: f32, max: f32) -> bool;
    fn on_destroyed(&mut self, from: PeerId, destroyer_id: PeerId) -> bool;
    fn on_spawn(
        &mut self,
        from: PeerId,
        x: f32,
        y: f32,
        direction: f32,
        tank_type: i32,
        initial_health: f32,
    ) -> bool;
    fn on_relay_message(&mut self, from: PeerId, text: &str) -> bool;
    fn on_group_message(&mut self, from: PeerId, group_id: GroupId, text: &str) -> bool;
}

/// Client-side contract: one method per server notification kind.
pub trait NotificationHandler {
    fn on_position_updated(&mut self, tank_id: PeerId, x: f32, y: f32, direction: f32) -> bool;
    fn on_bullet_spawned(
        &mut self,
        tank_id: PeerId,
        shooter_id: PeerId,
        position: (f32, f32),
        direction: f32,
        force: f32,
        origin: FireOrigin,
    ) -> bool;
    fn on_player_joined(&mut self, tank_id: PeerId, x: f32, y: f32, tank_type: i32) -> bool;
    fn on_player_left(&mut self, tank_id: PeerId) -> bool;
    fn on_health_updated(&mut self, tank_id: PeerId, current: f32, max: f32) -> bool;
    fn on_tank_destroyed(&mut self, tank_id: PeerId, destroyer_id: PeerId) -> bool;
    fn on_tank_spawned(
        &mut self,
        tank_id: PeerId,
        x: f32,
        y: f32,
        direction: f32,
        tank_type: i32,
        initial_health: f32,
    ) -> bool;
    fn on_relay_message(&mut self, text: &str) -> bool;
    fn on_peer_message(&mut self, from: PeerId, text: &str) -> bool;
    fn on_group_formed(&mut self, group_id: GroupId, members: &[PeerId]) -> bool;
    fn on_group_disbanded(&mut self, group_id: GroupId) -> bool;
}

/// Routes a client request to `handler`. Packets that are not requests are
/// handed back unchanged.
pub fn dispatch_request<H: RequestHandler + ?Sized>(
    handler: &mut H,
    from: PeerId,
    packet: Packet,
) -> Result<bool, Packet> {
    let handled = match packet {
        Packet::Move { x, y, direction } => handler.on_move(from, x, y, direction),
        Packet::Fire {
            direction,
            force,
            origin,
        } => handler.on_fire(from, direction, force, origin),
        Packet::SelectType { tank_type } => handler.on_select_type(from, tank_type),
        Packet::HealthUpdate { current, max } => handler.on_health_update(from, current, max),
        Packet::Destroyed { destroyer_id } => handler.on_destroyed(from, destroyer_id),
        Packet::Spawn {
            x,
            y,
            direction,
            tank_type,
            initial_health,
        } => handler.on_spawn(from, x, y, direction, tank_type, initial_health),
        Packet::RelayMessage { text } => handler.on_relay_message(from, &text),
        Packet::GroupMessage { group_id, text } => handler.on_group_message(from, group_id, &text),
        other => return Err(other),
    };
    Ok(handled)
}

/// Routes a server notification to `handler`. Packets that are not
/// notifications are handed back unchanged.
pub fn dispatch_notification<H: NotificationHandler + ?Sized>(
    handler: &mut H,
    packet: Packet,
) -> Result<bool, Packet> {
    let handled = match packet {
        Packet::PositionUpdated {
            tank_id,
            x,
            y,
            direction,
        } => handler.on_position_updated(tank_id, x, y, direction),
        Packet::BulletSpawned {
            tank_id,
            shooter_id,
            x,
            y,
            direction,
            force,
            origin,
        } => handler.on_bullet_spawned(tank_id, shooter_id, (x, y), direction, force, origin),
        Packet::PlayerJoined {
            tank_id,
            x,
            y,
            tank_type,
        } => handler.on_player_joined(tank_id, x, y, tank_type),
        Packet::PlayerLeft { tank_id } => handler.on_player_left(tank_id),
        Packet::HealthUpdated {
            tank_id,
            current,
            max,
        } => handler.on_health_updated(tank_id, current, max),
        Packet::TankDestroyed {
            tank_id,
            destroyer_id,
        } => handler.on_tank_destroyed(tank_id, destroyer_id),
        Packet::TankSpawned {
            tank_id,
            x,
            y,
            direction,
            tank_type,
            initial_health,
        } => handler.on_tank_spawned(tank_id, x, y, direction, tank_type, initial_health),
        Packet::RelayMessage { text } => handler.on_relay_message(&text),
        Packet::PeerMessage { from, text } => handler.on_peer_message(from, &text),
        Packet::GroupFormed { group_id, members } => handler.on_group_formed(group_id, &members),
        Packet::GroupDisbanded { group_id } => handler.on_group_disbanded(group_id),
        other => return Err(other),
    };
    Ok(handled)
}

/// Freeform relay payload, classified by its reserved prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayText {
    GroupInfo(GroupId),
    Relayed { from: PeerId, text: String },
    Plain(String),
    Malformed(String),
}

impl RelayText {
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix(GROUP_INFO_PREFIX) {
            return match rest.trim().parse::<GroupId>() {
                Ok(group_id) => RelayText::GroupInfo(group_id),
                Err(_) => RelayText::Malformed(raw.to_string()),
            };
        }

        if let Some(rest) = raw.strip_prefix(RELAY_PREFIX) {
            return match rest.split_once(':') {
                Some((source, text)) => match source.parse::<PeerId>() {
                    Ok(from) => RelayText::Relayed {
                        from,
                        text: text.to_string(),
                    },
                    Err(_) => RelayText::Malformed(raw.to_string()),
                },
                None => RelayText::Malformed(raw.to_string()),
            };
        }

        RelayText::Plain(raw.to_string())
    }

    pub fn group_info(group_id: GroupId) -> String {
        format!("{}{}", GROUP_INFO_PREFIX, group_id)
    }

    pub fn relayed(from: PeerId, text: &str) -> String {
        format!("{}{}:{}", RELAY_PREFIX, from, text)
    }
}

pub fn is_group_control(text: &str) -> bool {
    text.starts_with(GROUP_INFO_PREFIX)
}

/// Writes one length-prefixed bincode frame.
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> io::Result<()> {
    let payload =
        bincode::serialize(packet).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds {}", payload.len(), MAX_FRAME_LEN),
        ));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);

    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Reads one frame. `Ok(None)` means the peer closed the stream.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Packet>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds {}", len, MAX_FRAME_LEN),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    bincode::deserialize(&payload)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
