//! Request routing: applies each client request to the registry and fans
//! the resulting notification out to the other active peers.

use crate::channel::MessageSink;
use crate::error::RegistryError;
use crate::game::{joined_packet, GameServer};
use log::{debug, warn};
use shared::{
    is_group_control, FireOrigin, GroupId, Packet, PeerId, RelayText, RequestHandler, TankInfo,
};

impl<S: MessageSink> GameServer<S> {
    fn accepted(&self, from: PeerId, request: &str, result: Result<TankInfo, RegistryError>) -> Option<TankInfo> {
        match result {
            Ok(tank) => Some(tank),
            Err(e) => {
                warn!("Dropping {} from client {}: {}", request, from, e);
                None
            }
        }
    }
}

impl<S: MessageSink> RequestHandler for GameServer<S> {
    fn on_move(&mut self, from: PeerId, x: f32, y: f32, direction: f32) -> bool {
        let result = self.registry.apply_move(from, x, y, direction);
        let Some(tank) = self.accepted(from, "move", result) else {
            return false;
        };

        debug!(
            "Client {} moved to ({:.1}, {:.1}) facing {:.1}",
            from, tank.x, tank.y, tank.direction
        );
        self.broadcast_except(
            from,
            &Packet::PositionUpdated {
                tank_id: from,
                x: tank.x,
                y: tank.y,
                direction: tank.direction,
            },
        );
        true
    }

    fn on_fire(&mut self, from: PeerId, direction: f32, force: f32, origin: FireOrigin) -> bool {
        let Some(tank) = self.registry.get(from).cloned() else {
            warn!("Dropping fire from client {}: {}", from, RegistryError::not_found(from));
            return false;
        };

        let sent = self.broadcast_except(
            from,
            &Packet::BulletSpawned {
                tank_id: from,
                shooter_id: from,
                x: tank.x,
                y: tank.y,
                direction,
                force,
                origin,
            },
        );
        debug!("Bullet from client {} sent to {} peers", from, sent);
        true
    }

    fn on_select_type(&mut self, from: PeerId, tank_type: i32) -> bool {
        let result = self.registry.apply_type_select(from, tank_type);
        let Some(tank) = self.accepted(from, "type selection", result) else {
            return false;
        };

        debug!("Client {} selected tank type {}", from, tank_type);
        self.broadcast_except(from, &joined_packet(&tank));
        true
    }

    fn on_health_update(&mut self, from: PeerId, current: f32, max: f32) -> bool {
        let result = self.registry.apply_health_update(from, current, max);
        let Some(tank) = self.accepted(from, "health update", result) else {
            return false;
        };

        self.broadcast_except(
            from,
            &Packet::HealthUpdated {
                tank_id: from,
                current: tank.current_health,
                max: tank.max_health,
            },
        );
        true
    }

    fn on_destroyed(&mut self, from: PeerId, destroyer_id: PeerId) -> bool {
        let result = self.registry.apply_destroy(from, destroyer_id);
        if self.accepted(from, "destroy report", result).is_none() {
            return false;
        }

        debug!("Client {} reports destruction by {}", from, destroyer_id);
        self.broadcast_except(
            from,
            &Packet::TankDestroyed {
                tank_id: from,
                destroyer_id,
            },
        );
        true
    }

    fn on_spawn(
        &mut self,
        from: PeerId,
        x: f32,
        y: f32,
        direction: f32,
        tank_type: i32,
        initial_health: f32,
    ) -> bool {
        let result = self
            .registry
            .apply_spawn(from, x, y, direction, tank_type, initial_health);
        let Some(tank) = self.accepted(from, "spawn", result) else {
            return false;
        };

        self.broadcast_except(
            from,
            &Packet::TankSpawned {
                tank_id: from,
                x: tank.x,
                y: tank.y,
                direction: tank.direction,
                tank_type: tank.tank_type,
                initial_health: tank.max_health,
            },
        );
        true
    }

    fn on_relay_message(&mut self, from: PeerId, text: &str) -> bool {
        if is_group_control(text) {
            warn!("Ignoring group control text from client {}", from);
            return false;
        }

        let Some(targets) = self.groups.relay_targets(from) else {
            debug!("No relay group, dropping message from client {}", from);
            return false;
        };

        let packet = Packet::RelayMessage {
            text: RelayText::relayed(from, text),
        };
        self.sink.broadcast(&targets, &packet);
        debug!("Relayed message from client {} to {} peers", from, targets.len());
        true
    }

    fn on_group_message(&mut self, from: PeerId, group_id: GroupId, text: &str) -> bool {
        let Some(targets) = self.groups.targets_in(group_id, from) else {
            warn!(
                "Dropping message from client {} for stale group {}",
                from, group_id
            );
            return false;
        };

        let packet = Packet::PeerMessage {
            from,
            text: text.to_string(),
        };
        self.sink.broadcast(&targets, &packet);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Outbox;
    use shared::dispatch_request;
    use std::net::SocketAddr;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    /// Three connected peers with the join traffic already drained.
    fn three_peers() -> (GameServer<Outbox>, PeerId, PeerId, PeerId) {
        let mut game = GameServer::with_seed(Outbox::new(), 8, 3);
        let a = game.connect_peer(addr(9001)).unwrap();
        let b = game.connect_peer(addr(9002)).unwrap();
        let c = game.connect_peer(addr(9003)).unwrap();
        game.sink_mut().take();
        (game, a, b, c)
    }

    #[test]
    fn test_move_reaches_everyone_but_sender() {
        let (mut game, a, b, c) = three_peers();

        let handled = game.on_move(a, 10.0, 20.0, 90.0);
        assert!(handled);

        let expected = Packet::PositionUpdated {
            tank_id: a,
            x: 10.0,
            y: 20.0,
            direction: 90.0,
        };
        assert_eq!(game.sink().recipients_of(&expected), vec![b, c]);
        let tank = game.registry().get(a).unwrap();
        assert_eq!((tank.x, tank.y, tank.direction), (10.0, 20.0, 90.0));
    }

    #[test]
    fn test_fire_uses_server_position() {
        let (mut game, a, b, _) = three_peers();
        game.on_move(a, 33.0, 44.0, 0.0);
        game.sink_mut().take();

        let origin = FireOrigin::from_ground(1.0, 2.0);
        assert!(game.on_fire(a, 45.0, 30.0, origin));

        let to_b = game.sink().sent_to(b);
        assert_eq!(
            to_b,
            vec![Packet::BulletSpawned {
                tank_id: a,
                shooter_id: a,
                x: 33.0,
                y: 44.0,
                direction: 45.0,
                force: 30.0,
                origin,
            }]
        );
        assert!(game.sink().sent_to(a).is_empty());
    }

    #[test]
    fn test_type_select_rebroadcasts_join() {
        let (mut game, a, b, _) = three_peers();
        let tank = game.registry().get(a).unwrap().clone();

        assert!(game.on_select_type(a, 2));
        assert_eq!(
            game.sink().sent_to(b),
            vec![Packet::PlayerJoined {
                tank_id: a,
                x: tank.x,
                y: tank.y,
                tank_type: 2,
            }]
        );
    }

    #[test]
    fn test_health_update_is_clamped_before_fanout() {
        let (mut game, a, b, _) = three_peers();

        assert!(game.on_health_update(a, 250.0, 120.0));
        assert_eq!(
            game.sink().sent_to(b),
            vec![Packet::HealthUpdated {
                tank_id: a,
                current: 120.0,
                max: 120.0,
            }]
        );
    }

    #[test]
    fn test_destroy_then_spawn() {
        let (mut game, a, b, _) = three_peers();

        assert!(game.on_destroyed(a, b));
        assert!(game.registry().get(a).unwrap().destroyed);

        assert!(game.on_spawn(a, 5.0, 6.0, 180.0, 1, 90.0));
        let tank = game.registry().get(a).unwrap();
        assert!(!tank.destroyed);
        assert_eq!(tank.current_health, 90.0);

        assert_eq!(
            game.sink().sent_to(b),
            vec![
                Packet::TankDestroyed {
                    tank_id: a,
                    destroyer_id: b
                },
                Packet::TankSpawned {
                    tank_id: a,
                    x: 5.0,
                    y: 6.0,
                    direction: 180.0,
                    tank_type: 1,
                    initial_health: 90.0,
                },
            ]
        );
    }

    #[test]
    fn test_unknown_sender_is_dropped() {
        let (mut game, ..) = three_peers();

        assert!(!game.on_move(99, 1.0, 1.0, 1.0));
        assert!(!game.on_fire(99, 0.0, 25.0, FireOrigin::from_ground(0.0, 0.0)));
        assert!(game.sink().is_empty());
    }

    #[test]
    fn test_relay_prefixes_sender() {
        let (mut game, a, b, c) = three_peers();

        assert!(game.on_relay_message(b, "hello"));
        let expected = Packet::RelayMessage {
            text: "RELAY_FROM_2:hello".to_string(),
        };
        assert_eq!(b, 2);
        assert_eq!(game.sink().recipients_of(&expected), vec![a, c]);
    }

    #[test]
    fn test_relay_drops_control_text_and_lone_peer() {
        let (mut game, a, b, c) = three_peers();
        assert!(!game.on_relay_message(a, "P2P_GROUP_INFO:77"));

        game.disconnect_peer(b);
        game.disconnect_peer(c);
        game.sink_mut().take();

        assert!(!game.on_relay_message(a, "anyone?"));
        assert!(game.sink().is_empty());
    }

    #[test]
    fn test_group_message_reaches_members() {
        let (mut game, a, b, c) = three_peers();
        let group_id = game.groups().current_id().unwrap();

        assert!(game.on_group_message(c, group_id, "direct hi"));
        let expected = Packet::PeerMessage {
            from: c,
            text: "direct hi".to_string(),
        };
        assert_eq!(game.sink().recipients_of(&expected), vec![a, b]);

        assert!(!game.on_group_message(c, group_id + 100, "stale"));
    }

    #[test]
    fn test_dispatch_through_trait() {
        let (mut game, a, b, _) = three_peers();
        let handled = dispatch_request(&mut game, b, Packet::SelectType { tank_type: 3 });
        assert_eq!(handled, Ok(true));
        assert_eq!(game.registry().get(b).unwrap().tank_type, 3);
        assert_eq!(game.sink().sent_to(a).len(), 1);
    }
}
