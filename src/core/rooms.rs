//! Purpose: Group ("room") membership lookup contract and an in-memory implementation.
//! Exports: `GroupLookup`, `MemoryRooms`.
//! Role: Optional collaborator consulted only for `Selector::Group`.
//! Invariants: Lookups may be asynchronous and may fail; callers surface the error.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::error::Error;

pub type Membership = BTreeMap<String, BTreeSet<String>>;

#[async_trait]
pub trait GroupLookup: Send + Sync {
    /// Member ids for each requested name; unknown names map to an empty set.
    async fn members_of(&self, names: &BTreeSet<String>) -> Result<Membership, Error>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryRooms {
    rooms: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
}

impl MemoryRooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: impl Into<String>, id: impl Into<String>) {
        self.rooms
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .entry(room.into())
            .or_default()
            .insert(id.into());
    }

    pub fn leave(&self, room: &str, id: &str) {
        let mut rooms = self
            .rooms
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(members) = rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    pub fn leave_all(&self, id: &str) {
        let mut rooms = self
            .rooms
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        rooms.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
    }

    pub fn members(&self, room: &str) -> BTreeSet<String> {
        self.rooms
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(room)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl GroupLookup for MemoryRooms {
    async fn members_of(&self, names: &BTreeSet<String>) -> Result<Membership, Error> {
        Ok(names
            .iter()
            .map(|name| (name.clone(), self.members(name)))
            .collect())
    }
}
