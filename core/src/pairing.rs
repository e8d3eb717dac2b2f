use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::MediaKind;

/// One-to-one front → back relation between record positions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingMap {
    fronts: BTreeMap<usize, usize>,
    backs: BTreeMap<usize, usize>,
}

impl PairingMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paired(&self, position: usize) -> bool {
        self.fronts.contains_key(&position) || self.backs.contains_key(&position)
    }

    pub fn back_of(&self, front: usize) -> Option<usize> {
        self.fronts.get(&front).copied()
    }

    pub fn front_of(&self, back: usize) -> Option<usize> {
        self.backs.get(&back).copied()
    }

    pub fn len(&self) -> usize {
        self.fronts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fronts.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.fronts.iter().map(|(f, b)| (*f, *b))
    }

    /// Adds a pair. Returns false if either position is already taken.
    pub fn insert(&mut self, front: usize, back: usize) -> bool {
        if front == back || self.is_paired(front) || self.is_paired(back) {
            return false;
        }
        self.fronts.insert(front, back);
        self.backs.insert(back, front);
        true
    }

    /// Removes the pair `position` belongs to, in either role.
    pub fn remove(&mut self, position: usize) -> Option<(usize, usize)> {
        let front = if self.fronts.contains_key(&position) {
            position
        } else {
            *self.backs.get(&position)?
        };
        let back = self.fronts.remove(&front)?;
        self.backs.remove(&back);
        Some((front, back))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Video,
    AlreadyPaired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    FrontSelected(usize),
    Cancelled,
    Paired { front: usize, back: usize },
    Rejected(RejectReason),
}

/// Two-click front/back selection on top of a [`PairingMap`].
#[derive(Debug, Clone, Default)]
pub struct PairingModel {
    map: PairingMap,
    pending: Option<usize>,
}

impl PairingModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<usize> {
        self.pending
    }

    pub fn map(&self) -> &PairingMap {
        &self.map
    }

    pub fn into_map(self) -> PairingMap {
        self.map
    }

    pub fn is_selectable(&self, position: usize, kind: MediaKind) -> bool {
        kind != MediaKind::Video && !self.map.is_paired(position)
    }

    pub fn select(&mut self, position: usize, kind: MediaKind) -> SelectOutcome {
        if kind == MediaKind::Video {
            return SelectOutcome::Rejected(RejectReason::Video);
        }
        if self.map.is_paired(position) {
            return SelectOutcome::Rejected(RejectReason::AlreadyPaired);
        }
        match self.pending.take() {
            None => {
                self.pending = Some(position);
                SelectOutcome::FrontSelected(position)
            }
            Some(front) if front == position => SelectOutcome::Cancelled,
            Some(front) => {
                self.map.insert(front, position);
                SelectOutcome::Paired {
                    front,
                    back: position,
                }
            }
        }
    }

    pub fn unpair(&mut self, position: usize) -> Option<(usize, usize)> {
        self.map.remove(position)
    }
}
