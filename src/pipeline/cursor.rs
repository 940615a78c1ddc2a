//! Per-episode cursor ledger.

use std::collections::BTreeMap;

use crate::models::PostId;

/// Newest post seen per episode. Entries only ever move forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorLedger {
    cursors: BTreeMap<u32, PostId>,
}

impl CursorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, episode: u32) -> Option<&PostId> {
        self.cursors.get(&episode)
    }

    /// Record `id` for `episode` if it is newer than the current entry.
    /// Returns whether the ledger changed.
    pub fn set(&mut self, episode: u32, id: PostId) -> bool {
        match self.cursors.get(&episode) {
            Some(current) if !id.is_newer(current) => false,
            _ => {
                self.cursors.insert(episode, id);
                true
            }
        }
    }

    /// Fold every entry of `other` into this ledger.
    pub fn absorb(&mut self, other: &CursorLedger) {
        for (episode, id) in &other.cursors {
            self.set(*episode, id.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<u32, PostId> {
        self.cursors
    }
}

impl From<BTreeMap<u32, PostId>> for CursorLedger {
    fn from(cursors: BTreeMap<u32, PostId>) -> Self {
        Self { cursors }
    }
}
