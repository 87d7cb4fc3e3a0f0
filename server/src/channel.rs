//! Outbound delivery seam between the game core and the transport.
//!
//! The game core never touches sockets. Every notification it produces is
//! handed to a [`MessageSink`], which the network layer implements on top of
//! per-peer writer channels and tests implement with an in-memory [`Outbox`].

use log::{debug, warn};
use shared::{Packet, PeerId};
use std::collections::HashMap;
use tokio::sync::mpsc;

pub trait MessageSink {
    /// Queues `packet` for delivery to `peer`. Delivery order per peer
    /// follows call order.
    fn send_to(&mut self, peer: PeerId, packet: Packet);

    /// Called once a peer has left; later sends to it are dropped.
    fn detach(&mut self, _peer: PeerId) {}

    fn broadcast(&mut self, recipients: &[PeerId], packet: &Packet) {
        for &peer in recipients {
            self.send_to(peer, packet.clone());
        }
    }
}

/// Per-peer writer queues owned by the server actor.
#[derive(Debug, Default)]
pub struct PeerLinks {
    links: HashMap<PeerId, mpsc::UnboundedSender<Packet>>,
}

impl PeerLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, peer: PeerId, link: mpsc::UnboundedSender<Packet>) {
        self.links.insert(peer, link);
    }
}

impl MessageSink for PeerLinks {
    fn send_to(&mut self, peer: PeerId, packet: Packet) {
        match self.links.get(&peer) {
            Some(link) => {
                if link.send(packet).is_err() {
                    debug!("Writer for client {} already closed", peer);
                }
            }
            None => warn!("No outbound link for client {}", peer),
        }
    }

    fn detach(&mut self, peer: PeerId) {
        self.links.remove(&peer);
    }
}

/// In-memory sink that records every delivery in order.
#[derive(Debug, Default)]
pub struct Outbox {
    sent: Vec<(PeerId, Packet)>,
    detached: Vec<PeerId>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains everything recorded so far.
    pub fn take(&mut self) -> Vec<(PeerId, Packet)> {
        std::mem::take(&mut self.sent)
    }

    pub fn sent_to(&self, peer: PeerId) -> Vec<Packet> {
        self.sent
            .iter()
            .filter(|(to, _)| *to == peer)
            .map(|(_, packet)| packet.clone())
            .collect()
    }

    pub fn recipients_of(&self, packet: &Packet) -> Vec<PeerId> {
        self.sent
            .iter()
            .filter(|(_, sent)| sent == packet)
            .map(|(to, _)| *to)
            .collect()
    }

    pub fn detached(&self) -> &[PeerId] {
        &self.detached
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

impl MessageSink for Outbox {
    fn send_to(&mut self, peer: PeerId, packet: Packet) {
        self.sent.push((peer, packet));
    }

    fn detach(&mut self, peer: PeerId) {
        self.detached.push(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_preserves_recipient_order() {
        let mut outbox = Outbox::new();
        let packet = Packet::PlayerLeft { tank_id: 9 };

        outbox.broadcast(&[3, 1, 2], &packet);

        assert_eq!(outbox.recipients_of(&packet), vec![3, 1, 2]);
        assert_eq!(outbox.len(), 3);
    }

    #[test]
    fn test_outbox_take_drains() {
        let mut outbox = Outbox::new();
        outbox.send_to(1, Packet::Disconnect);
        assert_eq!(outbox.take(), vec![(1, Packet::Disconnect)]);
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn test_peer_links_route_and_detach() {
        let mut links = PeerLinks::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        links.attach(5, tx);

        links.send_to(5, Packet::PlayerLeft { tank_id: 2 });
        assert_eq!(rx.recv().await, Some(Packet::PlayerLeft { tank_id: 2 }));

        links.detach(5);
        // Sender dropped with the link, so the writer side sees the end.
        assert_eq!(rx.recv().await, None);

        // Unknown peers are ignored.
        links.send_to(5, Packet::Disconnect);
    }
}
