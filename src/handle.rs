use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Buffer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Texture => write!(f, "texture"),
            ResourceKind::Buffer => write!(f, "buffer"),
        }
    }
}

/// Generation-checked reference to a virtual resource.
///
/// Passes only ever hold handles; the physical resource behind a handle may
/// change between compiles. Equality is structural over all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    id: u32,
    kind: ResourceKind,
    generation: u32,
    name: String,
}

impl ResourceHandle {
    pub fn new(id: u32, kind: ResourceKind, generation: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            generation,
            name: name.into(),
        }
    }

    pub fn invalid(kind: ResourceKind) -> Self {
        Self::new(0, kind, 0, "")
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_valid(&self) -> bool {
        self.id != 0 && self.generation != 0 && !self.name.is_empty()
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' ({} #{} gen {})",
            self.name, self.kind, self.id, self.generation
        )
    }
}

#[derive(Debug, Clone)]
struct HandleSlot {
    kind: ResourceKind,
    generation: u32,
    name: String,
    live: bool,
}

impl HandleSlot {
    fn handle(&self, id: u32) -> ResourceHandle {
        ResourceHandle::new(id, self.kind, self.generation, self.name.clone())
    }

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1).max(1);
    }
}

/// Issues resource ids and tracks one generation counter per id.
///
/// Ids are never reused for a different name. Releasing a handle bumps the
/// generation of its id, so copies captured before the release stop
/// validating.
#[derive(Debug, Clone)]
pub struct ResourceHandleGenerator {
    next_id: u32,
    slots: HashMap<u32, HandleSlot>,
    names: HashMap<String, u32>,
}

impl ResourceHandleGenerator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            slots: HashMap::new(),
            names: HashMap::new(),
        }
    }

    /// Issues a handle with a fresh id.
    pub fn generate(&mut self, name: &str, kind: ResourceKind) -> ResourceHandle {
        let id = self.next_id;
        self.next_id += 1;

        let slot = HandleSlot {
            kind,
            generation: 1,
            name: name.to_string(),
            live: true,
        };
        let handle = slot.handle(id);
        self.slots.insert(id, slot);
        self.names.insert(name.to_string(), id);
        handle
    }

    /// Returns the live handle registered under `name`.
    ///
    /// A released name is revived on its old id with the bumped generation.
    /// A live name of a different kind is retired and reissued.
    pub fn acquire(&mut self, name: &str, kind: ResourceKind) -> ResourceHandle {
        if let Some(&id) = self.names.get(name)
            && let Some(slot) = self.slots.get_mut(&id)
        {
            if slot.live && slot.kind == kind {
                return slot.handle(id);
            }
            if slot.live {
                slot.bump();
            }
            slot.kind = kind;
            slot.live = true;
            return slot.handle(id);
        }

        self.generate(name, kind)
    }

    /// Releases a live handle. Returns false for unknown, stale or already
    /// released handles.
    pub fn release(&mut self, handle: &ResourceHandle) -> bool {
        match self.slots.get_mut(&handle.id) {
            Some(slot) if slot.live && slot.generation == handle.generation => {
                slot.bump();
                slot.live = false;
                true
            }
            _ => false,
        }
    }

    /// Returns the current handle for the id of `handle`, reviving it if it
    /// was released.
    pub fn reissue(&mut self, handle: &ResourceHandle) -> Option<ResourceHandle> {
        let slot = self.slots.get_mut(&handle.id)?;
        slot.live = true;
        Some(slot.handle(handle.id))
    }

    pub fn is_valid(&self, handle: &ResourceHandle) -> bool {
        handle.is_valid()
            && self
                .slots
                .get(&handle.id)
                .is_some_and(|slot| slot.live && slot.generation == handle.generation)
    }

    pub fn current_generation(&self, id: u32) -> Option<u32> {
        self.slots.get(&id).map(|slot| slot.generation)
    }

    pub fn live_count(&self) -> usize {
        self.slots.values().filter(|slot| slot.live).count()
    }

    /// Releases every live handle whose id is not in `keep`.
    pub fn release_unused(&mut self, keep: &HashSet<u32>) -> Vec<ResourceHandle> {
        let mut released = Vec::new();
        for (&id, slot) in self.slots.iter_mut() {
            if slot.live && !keep.contains(&id) {
                released.push(slot.handle(id));
                slot.bump();
                slot.live = false;
            }
        }
        released.sort_by_key(|handle| handle.id);
        released
    }
}

impl Default for ResourceHandleGenerator {
    fn default() -> Self {
        Self::new()
    }
}
