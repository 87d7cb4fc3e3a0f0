//! Authoritative game core: owns the registry, the session table and the
//! relay group, and turns lifecycle events into outbound notifications.
//!
//! `GameServer` is transport-agnostic. It is driven by a single task, so
//! every operation runs to completion before the next one starts and the
//! notifications it emits for one event are never interleaved with another's.

use crate::channel::MessageSink;
use crate::error::ConnectError;
use crate::registry::Registry;
use crate::relay::RelayGroups;
use crate::session::SessionTable;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{dispatch_request, Packet, PeerId, RelayText, TankInfo, SPAWN_AREA};
use std::net::SocketAddr;

pub struct GameServer<S: MessageSink> {
    pub(crate) registry: Registry,
    pub(crate) sessions: SessionTable,
    pub(crate) groups: RelayGroups,
    pub(crate) sink: S,
    rng: StdRng,
}

impl<S: MessageSink> GameServer<S> {
    pub fn new(sink: S, max_clients: usize) -> Self {
        Self::with_rng(sink, max_clients, StdRng::from_entropy())
    }

    /// Deterministic spawn positions, for tests.
    pub fn with_seed(sink: S, max_clients: usize, seed: u64) -> Self {
        Self::with_rng(sink, max_clients, StdRng::seed_from_u64(seed))
    }

    fn with_rng(sink: S, max_clients: usize, rng: StdRng) -> Self {
        Self {
            registry: Registry::new(),
            sessions: SessionTable::new(max_clients),
            groups: RelayGroups::new(),
            sink,
            rng,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn groups(&self) -> &RelayGroups {
        &self.groups
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Reserves a peer id for a new connection.
    pub fn begin_connect(&mut self, addr: SocketAddr) -> Result<PeerId, ConnectError> {
        self.sessions.begin(addr)
    }

    /// Allocates the tank for a `Connecting` peer and announces it.
    ///
    /// Order of delivery:
    /// 1. `Connected` with the new tank to the joining peer
    /// 2. for each existing tank, `PlayerJoined` + `HealthUpdated` (and
    ///    `TankDestroyed` if it is down) to the joining peer
    /// 3. `PlayerJoined` + `HealthUpdated` for the new tank to everyone else
    /// 4. relay group rebuild
    pub fn complete_connect(&mut self, peer_id: PeerId) -> bool {
        if !self.sessions.activate(peer_id) {
            warn!("Client {} is not awaiting connection", peer_id);
            return false;
        }

        let x = self.rng.gen_range(0.0..SPAWN_AREA);
        let y = self.rng.gen_range(0.0..SPAWN_AREA);
        let tank = TankInfo::new(peer_id, x, y);

        let existing: Vec<TankInfo> = self.registry.tanks().into_iter().cloned().collect();
        self.registry.insert(tank.clone());

        self.sink.send_to(
            peer_id,
            Packet::Connected {
                client_id: peer_id,
                tank: tank.clone(),
            },
        );

        for other in &existing {
            self.send_catch_up(peer_id, other);
        }

        let recipients: Vec<PeerId> = existing.iter().map(|other| other.id).collect();
        self.sink.broadcast(&recipients, &joined_packet(&tank));
        self.sink.broadcast(&recipients, &health_packet(&tank));

        info!(
            "Client {} joined at ({:.1}, {:.1}), {} tanks in play",
            peer_id,
            x,
            y,
            self.registry.len()
        );

        self.refresh_relay_group();
        true
    }

    /// Convenience for callers that do not need to act between the two
    /// connection phases.
    pub fn connect_peer(&mut self, addr: SocketAddr) -> Result<PeerId, ConnectError> {
        let peer_id = self.begin_connect(addr)?;
        self.complete_connect(peer_id);
        Ok(peer_id)
    }

    fn send_catch_up(&mut self, to: PeerId, tank: &TankInfo) {
        self.sink.send_to(to, joined_packet(tank));
        self.sink.send_to(to, health_packet(tank));
        if tank.destroyed {
            self.sink.send_to(
                to,
                Packet::TankDestroyed {
                    tank_id: tank.id,
                    destroyer_id: tank.destroyed_by,
                },
            );
        }
    }

    /// Removes a peer, tells the remaining tanks and rebuilds the group.
    /// Returns `false` if the peer was already gone.
    pub fn disconnect_peer(&mut self, peer_id: PeerId) -> bool {
        let session = match self.sessions.end(peer_id) {
            Some(session) => session,
            None => {
                debug!("Client {} already disconnected", peer_id);
                return false;
            }
        };
        self.sink.detach(peer_id);

        if self.registry.remove(peer_id).is_some() {
            let remaining = self.registry.ids();
            self.sink
                .broadcast(&remaining, &Packet::PlayerLeft { tank_id: peer_id });
        }

        info!(
            "Client {} ({}) disconnected after {:.1}s",
            peer_id,
            session.addr,
            session.uptime().as_secs_f32()
        );

        self.refresh_relay_group();
        true
    }

    /// Feeds one inbound packet from an active peer through the router.
    pub fn handle_packet(&mut self, from: PeerId, packet: Packet) {
        match dispatch_request(self, from, packet) {
            Ok(_) => {}
            Err(Packet::Disconnect) => {
                self.disconnect_peer(from);
            }
            Err(other) => warn!("Unexpected packet from client {}: {:?}", from, other),
        }
    }

    pub(crate) fn broadcast_except(&mut self, exclude: PeerId, packet: &Packet) -> usize {
        let recipients = self.registry.ids_except(exclude);
        self.sink.broadcast(&recipients, packet);
        recipients.len()
    }

    pub(crate) fn broadcast_all(&mut self, packet: &Packet) -> usize {
        let recipients = self.registry.ids();
        self.sink.broadcast(&recipients, packet);
        recipients.len()
    }

    fn refresh_relay_group(&mut self) {
        let active = self.sessions.active_ids();
        let change = self.groups.recompute(&active);

        if let Some(old) = change.disbanded {
            let still_here: Vec<PeerId> = old
                .members
                .iter()
                .copied()
                .filter(|peer| self.sessions.is_active(*peer))
                .collect();
            self.sink
                .broadcast(&still_here, &Packet::GroupDisbanded { group_id: old.id });
            debug!("Relay group {} disbanded", old.id);
        }

        if let Some(group) = change.formed {
            let members = group.member_list();
            let formed = Packet::GroupFormed {
                group_id: group.id,
                members: members.clone(),
            };
            let info = Packet::RelayMessage {
                text: RelayText::group_info(group.id),
            };
            for &member in &members {
                self.sink.send_to(member, formed.clone());
                self.sink.send_to(member, info.clone());
            }
            info!(
                "Relay group {} created with {} members",
                group.id,
                members.len()
            );
        }
    }
}

pub(crate) fn joined_packet(tank: &TankInfo) -> Packet {
    Packet::PlayerJoined {
        tank_id: tank.id,
        x: tank.x,
        y: tank.y,
        tank_type: tank.tank_type,
    }
}

pub(crate) fn health_packet(tank: &TankInfo) -> Packet {
    Packet::HealthUpdated {
        tank_id: tank.id,
        current: tank.current_health,
        max: tank.max_health,
    }
}
