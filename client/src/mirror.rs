//! Client-side projection of the game state.
//!
//! The mirror keeps one view of the local tank and one per known remote
//! tank. Server notifications always win; local requests update the own
//! view optimistically at send time and are overwritten by the echo later.
//! Remote tanks only come into existence through a join or spawn
//! notification, so updates for ids never seen are dropped.

use log::{debug, info, warn};
use shared::{
    describe_destroyer, FireOrigin, GroupId, NotificationHandler, PeerId, RelayText, TankInfo,
    MAX_MESSAGE_HISTORY,
};
use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
pub struct LocalMirror {
    local: TankInfo,
    others: HashMap<PeerId, TankInfo>,
    group_id: Option<GroupId>,
    group_members: Vec<PeerId>,
    history: VecDeque<String>,
}

impl LocalMirror {
    /// Starts from the spawn record handed over at connect time.
    pub fn new(local: TankInfo) -> Self {
        Self {
            local,
            others: HashMap::new(),
            group_id: None,
            group_members: Vec::new(),
            history: VecDeque::with_capacity(MAX_MESSAGE_HISTORY),
        }
    }

    pub fn local(&self) -> &TankInfo {
        &self.local
    }

    pub fn other(&self, id: PeerId) -> Option<&TankInfo> {
        self.others.get(&id)
    }

    pub fn group_id(&self) -> Option<GroupId> {
        self.group_id
    }

    pub fn group_members(&self) -> &[PeerId] {
        &self.group_members
    }

    pub fn history(&self) -> impl Iterator<Item = &String> {
        self.history.iter()
    }

    /// Appends to the message history, evicting the oldest entry when full.
    pub fn record_message(&mut self, entry: String) {
        if self.history.len() == MAX_MESSAGE_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    pub fn predict_move(&mut self, x: f32, y: f32, direction: f32) {
        self.local.set_transform(x, y, direction);
    }

    pub fn predict_type(&mut self, tank_type: i32) {
        self.local.tank_type = tank_type;
    }

    pub fn predict_health(&mut self, current: f32, max: f32) {
        self.local.set_health(current, max);
    }

    pub fn predict_destroyed(&mut self, destroyer_id: PeerId) {
        self.local.mark_destroyed(destroyer_id);
    }

    pub fn predict_spawn(&mut self, x: f32, y: f32, direction: f32, tank_type: i32, health: f32) {
        self.local.respawn(x, y, direction, tank_type, health);
    }

    /// Origin for a shot fired from the current own position.
    pub fn fire_origin(&self) -> FireOrigin {
        FireOrigin::from_ground(self.local.x, self.local.y)
    }

    pub fn status_line(&self) -> String {
        format!(
            "[ID: {}] Pos: ({:.1}, {:.1}) Dir: {:.1} Type: {} Health: {} | Others: {}",
            self.local.id,
            self.local.x,
            self.local.y,
            self.local.direction,
            self.local.tank_type,
            self.local.health_label(),
            self.others.len()
        )
    }

    pub fn group_status(&self, connected: bool) -> String {
        let mut lines = vec![
            "===== Connection Status =====".to_string(),
            format!("Connected to server: {}", connected),
            format!("My ID: {}", self.local.id),
        ];
        match self.group_id {
            Some(group_id) => {
                lines.push(format!("Relay group: {}", group_id));
                let members: Vec<String> =
                    self.group_members.iter().map(|id| id.to_string()).collect();
                lines.push(format!("Group members: {}", members.join(", ")));
            }
            None => lines.push("Relay group: none".to_string()),
        }
        lines.push(format!("Known tanks: {}", self.others.len()));
        lines.join("\n")
    }

    pub fn history_report(&self) -> String {
        if self.history.is_empty() {
            return "No messages yet".to_string();
        }
        let mut lines = vec!["===== Message History =====".to_string()];
        lines.extend(self.history.iter().cloned());
        lines.join("\n")
    }

    fn is_local(&self, id: PeerId) -> bool {
        id == self.local.id
    }
}

impl NotificationHandler for LocalMirror {
    fn on_position_updated(&mut self, tank_id: PeerId, x: f32, y: f32, direction: f32) -> bool {
        if self.is_local(tank_id) {
            self.local.set_transform(x, y, direction);
            return true;
        }
        match self.others.get_mut(&tank_id) {
            Some(tank) => {
                tank.set_transform(x, y, direction);
                debug!("Tank {} moved to ({:.1}, {:.1})", tank_id, x, y);
                true
            }
            None => {
                debug!("Position for unknown tank {} dropped", tank_id);
                false
            }
        }
    }

    fn on_bullet_spawned(
        &mut self,
        tank_id: PeerId,
        shooter_id: PeerId,
        position: (f32, f32),
        direction: f32,
        force: f32,
        _origin: FireOrigin,
    ) -> bool {
        if !self.is_local(tank_id) && !self.others.contains_key(&tank_id) {
            debug!("Bullet from unknown tank {} dropped", tank_id);
            return false;
        }
        info!(
            "Tank {} fired from ({:.1}, {:.1}) dir {:.1} force {:.1} (shooter {})",
            tank_id, position.0, position.1, direction, force, shooter_id
        );
        true
    }

    fn on_player_joined(&mut self, tank_id: PeerId, x: f32, y: f32, tank_type: i32) -> bool {
        if self.is_local(tank_id) {
            self.local.x = x;
            self.local.y = y;
            self.local.tank_type = tank_type;
            return true;
        }

        match self.others.get_mut(&tank_id) {
            Some(tank) => {
                tank.x = x;
                tank.y = y;
                tank.tank_type = tank_type;
                debug!("Tank {} now type {}", tank_id, tank_type);
            }
            None => {
                let mut tank = TankInfo::new(tank_id, x, y);
                tank.tank_type = tank_type;
                self.others.insert(tank_id, tank);
                info!("Tank {} joined at ({:.1}, {:.1})", tank_id, x, y);
            }
        }
        true
    }

    fn on_player_left(&mut self, tank_id: PeerId) -> bool {
        if self.others.remove(&tank_id).is_some() {
            self.group_members.retain(|member| *member != tank_id);
            info!("Tank {} left", tank_id);
            true
        } else {
            false
        }
    }

    fn on_health_updated(&mut self, tank_id: PeerId, current: f32, max: f32) -> bool {
        let tank = if self.is_local(tank_id) {
            &mut self.local
        } else {
            match self.others.get_mut(&tank_id) {
                Some(tank) => tank,
                None => {
                    debug!("Health for unknown tank {} dropped", tank_id);
                    return false;
                }
            }
        };
        tank.set_health(current, max);
        debug!("Tank {} health {}", tank_id, tank.health_label());
        true
    }

    fn on_tank_destroyed(&mut self, tank_id: PeerId, destroyer_id: PeerId) -> bool {
        if self.is_local(tank_id) {
            self.local.mark_destroyed(destroyer_id);
            info!("My tank was destroyed {}", describe_destroyer(destroyer_id));
            return true;
        }
        match self.others.get_mut(&tank_id) {
            Some(tank) => {
                tank.mark_destroyed(destroyer_id);
                info!(
                    "Tank {} was destroyed {}",
                    tank_id,
                    describe_destroyer(destroyer_id)
                );
                true
            }
            None => false,
        }
    }

    fn on_tank_spawned(
        &mut self,
        tank_id: PeerId,
        x: f32,
        y: f32,
        direction: f32,
        tank_type: i32,
        initial_health: f32,
    ) -> bool {
        let tank = if self.is_local(tank_id) {
            &mut self.local
        } else {
            self.others
                .entry(tank_id)
                .or_insert_with(|| TankInfo::new(tank_id, x, y))
        };
        tank.respawn(x, y, direction, tank_type, initial_health);
        info!("Tank {} spawned at ({:.1}, {:.1})", tank_id, x, y);
        true
    }

    fn on_relay_message(&mut self, text: &str) -> bool {
        match RelayText::parse(text) {
            RelayText::GroupInfo(group_id) => {
                self.group_id = Some(group_id);
                info!("Joined relay group {}", group_id);
            }
            RelayText::Relayed { from, text } => {
                self.record_message(format!("Message from Client ID {} (relayed): {}", from, text));
            }
            RelayText::Plain(text) => {
                self.record_message(format!("Message: {}", text));
            }
            RelayText::Malformed(raw) => {
                warn!("Malformed relay text: {}", raw);
                return false;
            }
        }
        true
    }

    fn on_peer_message(&mut self, from: PeerId, text: &str) -> bool {
        self.record_message(format!("Message from Client ID {} (direct): {}", from, text));
        true
    }

    fn on_group_formed(&mut self, group_id: GroupId, members: &[PeerId]) -> bool {
        self.group_id = Some(group_id);
        self.group_members = members
            .iter()
            .copied()
            .filter(|member| !self.is_local(*member))
            .collect();
        true
    }

    fn on_group_disbanded(&mut self, group_id: GroupId) -> bool {
        if self.group_id != Some(group_id) {
            return false;
        }
        self.group_id = None;
        self.group_members.clear();
        info!("Relay group {} disbanded", group_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{dispatch_notification, Packet, FIRE_HEIGHT};

    fn mirror() -> LocalMirror {
        LocalMirror::new(TankInfo::new(1, 10.0, 10.0))
    }

    fn join(mirror: &mut LocalMirror, id: PeerId) {
        assert!(mirror.on_player_joined(id, 50.0, 60.0, -1));
    }

    #[test]
    fn test_join_then_health_builds_remote_view() {
        let mut mirror = mirror();
        join(&mut mirror, 2);
        assert!(mirror.on_health_updated(2, 80.0, 100.0));

        let tank = mirror.other(2).unwrap();
        assert_eq!((tank.x, tank.y), (50.0, 60.0));
        assert_eq!(tank.current_health, 80.0);
        assert!(!tank.destroyed);
    }

    #[test]
    fn test_updates_for_unknown_remote_are_dropped() {
        let mut mirror = mirror();

        assert!(!mirror.on_position_updated(7, 1.0, 2.0, 3.0));
        assert!(!mirror.on_health_updated(7, 50.0, 100.0));
        assert!(!mirror.on_tank_destroyed(7, 0));
        assert!(!mirror.on_player_left(7));
        assert!(mirror.other(7).is_none());
    }

    #[test]
    fn test_spawn_creates_unknown_remote() {
        let mut mirror = mirror();
        assert!(mirror.on_tank_spawned(4, 1.0, 2.0, 90.0, 2, 120.0));

        let tank = mirror.other(4).unwrap();
        assert_eq!(tank.tank_type, 2);
        assert_eq!(tank.current_health, 120.0);
        assert_eq!(tank.direction, 90.0);
    }

    #[test]
    fn test_rejoin_keeps_health() {
        let mut mirror = mirror();
        join(&mut mirror, 2);
        mirror.on_health_updated(2, 30.0, 100.0);

        mirror.on_player_joined(2, 50.0, 60.0, 3);
        let tank = mirror.other(2).unwrap();
        assert_eq!(tank.tank_type, 3);
        assert_eq!(tank.current_health, 30.0);
    }

    #[test]
    fn test_notifications_about_self_overwrite_local() {
        let mut mirror = mirror();
        mirror.predict_move(99.0, 99.0, 45.0);

        mirror.on_position_updated(1, 5.0, 6.0, 7.0);
        assert_eq!(
            (mirror.local().x, mirror.local().y, mirror.local().direction),
            (5.0, 6.0, 7.0)
        );

        mirror.on_health_updated(1, 0.0, 100.0);
        assert!(mirror.local().destroyed);

        mirror.on_tank_destroyed(1, 3);
        assert_eq!(mirror.local().destroyed_by, 3);
        assert!(mirror.other(1).is_none());
    }

    #[test]
    fn test_health_update_revives_remote() {
        let mut mirror = mirror();
        join(&mut mirror, 2);
        mirror.on_tank_destroyed(2, 1);
        assert!(mirror.other(2).unwrap().destroyed);

        mirror.on_health_updated(2, 10.0, 100.0);
        assert!(!mirror.other(2).unwrap().destroyed);
    }

    #[test]
    fn test_player_left_removes_remote() {
        let mut mirror = mirror();
        join(&mut mirror, 2);
        mirror.on_group_formed(5, &[1, 2]);

        assert!(mirror.on_player_left(2));
        assert!(mirror.other(2).is_none());
        assert!(mirror.group_members().is_empty());
    }

    #[test]
    fn test_group_tracking() {
        let mut mirror = mirror();

        mirror.on_group_formed(3, &[1, 2, 4]);
        assert_eq!(mirror.group_id(), Some(3));
        assert_eq!(mirror.group_members(), &[2, 4]);

        assert!(!mirror.on_group_disbanded(2), "stale id");
        assert_eq!(mirror.group_id(), Some(3));

        assert!(mirror.on_group_disbanded(3));
        assert_eq!(mirror.group_id(), None);

        assert!(mirror.on_relay_message("P2P_GROUP_INFO:8"));
        assert_eq!(mirror.group_id(), Some(8));
    }

    #[test]
    fn test_relay_text_goes_to_history() {
        let mut mirror = mirror();

        assert!(mirror.on_relay_message("RELAY_FROM_2:hello"));
        assert!(mirror.on_peer_message(3, "hi there"));
        assert!(!mirror.on_relay_message("RELAY_FROM_x:bad"));

        let history: Vec<&String> = mirror.history().collect();
        assert_eq!(
            history,
            vec![
                "Message from Client ID 2 (relayed): hello",
                "Message from Client ID 3 (direct): hi there",
            ]
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let mut mirror = mirror();
        for i in 0..15 {
            mirror.record_message(format!("msg {}", i));
        }

        let history: Vec<&String> = mirror.history().collect();
        assert_eq!(history.len(), MAX_MESSAGE_HISTORY);
        assert_eq!(history[0], "msg 5");
        assert_eq!(history[9], "msg 14");
    }

    #[test]
    fn test_optimistic_updates() {
        let mut mirror = mirror();

        mirror.predict_type(2);
        mirror.predict_health(250.0, 150.0);
        assert_eq!(mirror.local().tank_type, 2);
        assert_eq!(mirror.local().current_health, 150.0);

        mirror.predict_destroyed(0);
        assert!(mirror.local().destroyed);

        mirror.predict_spawn(20.0, 30.0, 0.0, 1, 100.0);
        assert!(!mirror.local().destroyed);

        let origin = mirror.fire_origin();
        assert_approx_eq!(origin.x, 20.0);
        assert_approx_eq!(origin.y, FIRE_HEIGHT);
        assert_approx_eq!(origin.z, 30.0);
    }

    #[test]
    fn test_dispatch_into_mirror() {
        let mut mirror = mirror();
        let packets = vec![
            Packet::PlayerJoined {
                tank_id: 2,
                x: 1.0,
                y: 2.0,
                tank_type: 0,
            },
            Packet::HealthUpdated {
                tank_id: 2,
                current: 0.0,
                max: 100.0,
            },
            Packet::TankDestroyed {
                tank_id: 2,
                destroyer_id: 0,
            },
        ];
        for packet in packets {
            assert_eq!(dispatch_notification(&mut mirror, packet), Ok(true));
        }
        assert!(mirror.other(2).unwrap().destroyed);

        let handed_back = dispatch_notification(&mut mirror, Packet::Disconnect);
        assert_eq!(handed_back, Err(Packet::Disconnect));
    }

    #[test]
    fn test_status_strings() {
        let mut mirror = mirror();
        join(&mut mirror, 2);
        mirror.on_group_formed(1, &[1, 2]);

        assert!(mirror.status_line().contains("[ID: 1]"));
        assert!(mirror.status_line().contains("Others: 1"));
        let status = mirror.group_status(true);
        assert!(status.contains("Relay group: 1"));
        assert!(status.contains("Group members: 2"));
        assert_eq!(mirror.history_report(), "No messages yet");
    }
}
