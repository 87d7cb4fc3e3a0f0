//! Per-peer session tracking for the tank server
//!
//! Every transport connection goes through the same lifecycle:
//! - `Connecting` while the handshake completes and a tank is allocated
//! - `Active` once the peer has been announced to everyone else
//! - `Disconnected` after the peer leaves; the session is then dropped
//!
//! The table also enforces the configured capacity and hands out peer ids,
//! which start at 1 and are never reused within a run.

use crate::error::ConnectError;
use log::info;
use shared::PeerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Disconnected,
}

#[derive(Debug)]
pub struct PeerSession {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub state: SessionState,
    pub connected_at: Instant,
}

impl PeerSession {
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            state: SessionState::Connecting,
            connected_at: Instant::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Sessions indexed by peer id.
pub struct SessionTable {
    sessions: HashMap<PeerId, PeerSession>,
    next_peer_id: PeerId,
    max_clients: usize,
}

impl SessionTable {
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            next_peer_id: 1,
            max_clients,
        }
    }

    /// Opens a `Connecting` session, or refuses when the table is full.
    pub fn begin(&mut self, addr: SocketAddr) -> Result<PeerId, ConnectError> {
        if self.sessions.len() >= self.max_clients {
            return Err(ConnectError::ServerFull);
        }

        let peer_id = self.next_peer_id;
        self.next_peer_id += 1;

        info!("Client {} connecting from {}", peer_id, addr);
        self.sessions.insert(peer_id, PeerSession::new(peer_id, addr));
        Ok(peer_id)
    }

    /// Moves a `Connecting` session to `Active`. Any other state is left
    /// untouched and reported as `false`.
    pub fn activate(&mut self, peer_id: PeerId) -> bool {
        match self.sessions.get_mut(&peer_id) {
            Some(session) if session.state == SessionState::Connecting => {
                session.state = SessionState::Active;
                true
            }
            _ => false,
        }
    }

    /// Ends a session and returns it in the `Disconnected` state.
    pub fn end(&mut self, peer_id: PeerId) -> Option<PeerSession> {
        self.sessions.remove(&peer_id).map(|mut session| {
            session.state = SessionState::Disconnected;
            session
        })
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&PeerSession> {
        self.sessions.get(&peer_id)
    }

    pub fn state(&self, peer_id: PeerId) -> Option<SessionState> {
        self.sessions.get(&peer_id).map(|session| session.state)
    }

    pub fn is_active(&self, peer_id: PeerId) -> bool {
        self.state(peer_id) == Some(SessionState::Active)
    }

    /// Active peer ids in ascending order.
    pub fn active_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .sessions
            .values()
            .filter(|session| session.is_active())
            .map(|session| session.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
