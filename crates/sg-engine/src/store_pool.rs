//! Generational arena of chunk stores, one per open file.
//!
//! Tabs hold a [`StoreHandle`] rather than the store itself. A handle whose
//! slot has been freed and reused no longer resolves, so a closed tab can
//! never reach another file's bytes.

use std::sync::Arc;

use sg_core::FileIdentity;

use crate::chunk_store::{ChunkStore, SharedChunkStore};
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    store: Option<SharedChunkStore>,
}

#[derive(Default)]
pub struct StorePool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl StorePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, store: ChunkStore) -> StoreHandle {
        let store = store.shared();
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.store = Some(store);
            return StoreHandle { index, generation: slot.generation };
        }
        self.slots.push(Slot { generation: 0, store: Some(store) });
        StoreHandle { index: (self.slots.len() - 1) as u32, generation: 0 }
    }

    /// The store behind `handle`. Cloning the `Arc` is the whole cost of a
    /// tab switch.
    pub fn get(&self, handle: StoreHandle) -> Option<SharedChunkStore> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.store.as_ref())
            .map(Arc::clone)
    }

    pub fn contains(&self, handle: StoreHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: StoreHandle) -> Option<SharedChunkStore> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let store = slot.store.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(store)
    }

    /// Handle of a live store for the same file, if any.
    pub fn find(&self, identity: &FileIdentity) -> Option<StoreHandle> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let store = slot.store.as_ref()?;
            (lock(store).identity() == identity)
                .then_some(StoreHandle { index: index as u32, generation: slot.generation })
        })
    }

    pub fn handles(&self) -> Vec<StoreHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.store.is_some())
            .map(|(index, slot)| StoreHandle { index: index as u32, generation: slot.generation })
            .collect()
    }
}
