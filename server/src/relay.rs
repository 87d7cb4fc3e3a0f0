//! Relay group bookkeeping.
//!
//! At most one group exists at a time. It contains every active peer and is
//! rebuilt from scratch whenever the active set changes; a group needs at
//! least two members to exist.

use log::debug;
use shared::{GroupId, PeerId};
use std::collections::BTreeSet;

pub const MIN_GROUP_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct RelayGroup {
    pub id: GroupId,
    pub members: BTreeSet<PeerId>,
}

impl RelayGroup {
    pub fn contains(&self, peer: PeerId) -> bool {
        self.members.contains(&peer)
    }

    pub fn member_list(&self) -> Vec<PeerId> {
        self.members.iter().copied().collect()
    }

    pub fn others(&self, exclude: PeerId) -> Vec<PeerId> {
        self.members
            .iter()
            .copied()
            .filter(|peer| *peer != exclude)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Outcome of a recompute: the group that went away and the one that
/// replaced it, either of which may be absent.
#[derive(Debug, Default, PartialEq)]
pub struct GroupChange {
    pub disbanded: Option<RelayGroup>,
    pub formed: Option<RelayGroup>,
}

#[derive(Debug)]
pub struct RelayGroups {
    current: Option<RelayGroup>,
    next_group_id: GroupId,
}

impl Default for RelayGroups {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayGroups {
    pub fn new() -> Self {
        Self {
            current: None,
            next_group_id: 1,
        }
    }

    /// Disbands the current group and, with enough active peers, forms a
    /// new one under a fresh id.
    pub fn recompute(&mut self, active: &[PeerId]) -> GroupChange {
        let disbanded = self.current.take();

        let members: BTreeSet<PeerId> = active.iter().copied().collect();
        let formed = if members.len() >= MIN_GROUP_SIZE {
            let group = RelayGroup {
                id: self.next_group_id,
                members,
            };
            self.next_group_id += 1;
            self.current = Some(group.clone());
            Some(group)
        } else {
            debug!(
                "Not enough clients for a relay group ({} of {})",
                members.len(),
                MIN_GROUP_SIZE
            );
            None
        };

        GroupChange { disbanded, formed }
    }

    pub fn current(&self) -> Option<&RelayGroup> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<GroupId> {
        self.current.as_ref().map(|group| group.id)
    }

    /// Other members of the current group, if `sender` belongs to it.
    pub fn relay_targets(&self, sender: PeerId) -> Option<Vec<PeerId>> {
        self.current
            .as_ref()
            .filter(|group| group.contains(sender))
            .map(|group| group.others(sender))
    }

    /// Same as [`relay_targets`](Self::relay_targets) but only while
    /// `group_id` still names the current group.
    pub fn targets_in(&self, group_id: GroupId, sender: PeerId) -> Option<Vec<PeerId>> {
        match self.current_id() {
            Some(current) if current == group_id => self.relay_targets(sender),
            _ => None,
        }
    }
}
