use crate::compiled::ResourceBinding;
use crate::device::{DeviceResource, PhysicalResourceId, RenderDevice};
use crate::error::Result;
use crate::handle::{ResourceHandle, ResourceHandleGenerator};
use crate::resource::{ResourceDescription, ResourceScope, ResourceUsageInfo, VirtualResource};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Liveness interval of a resource, as indices into the execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLifetime {
    pub handle: ResourceHandle,
    pub first_use: usize,
    pub last_use: usize,
}

impl ResourceLifetime {
    pub fn overlaps(&self, other: &ResourceLifetime) -> bool {
        self.first_use <= other.last_use && other.first_use <= self.last_use
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliasSlot {
    pub description: ResourceDescription,
    pub occupants: Vec<ResourceHandle>,
    pub lifetime_end: usize,
}

/// Transient handle id to slot index, plus the slots themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasingPlan {
    pub aliases: HashMap<u32, usize>,
    pub slots: Vec<AliasSlot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AliasingStats {
    pub virtual_resources: usize,
    pub physical_resources: usize,
    pub requested_bytes: u64,
    pub allocated_bytes: u64,
}

impl AliasingStats {
    pub fn saved_bytes(&self) -> u64 {
        self.requested_bytes.saturating_sub(self.allocated_bytes)
    }
}

impl AliasingPlan {
    pub fn stats(&self, resources: &HashMap<u32, VirtualResource>) -> AliasingStats {
        AliasingStats {
            virtual_resources: self.aliases.len(),
            physical_resources: self.slots.len(),
            requested_bytes: self
                .aliases
                .keys()
                .filter_map(|id| resources.get(id))
                .map(|resource| resource.description.estimated_size())
                .sum(),
            allocated_bytes: self
                .slots
                .iter()
                .map(|slot| slot.description.estimated_size())
                .sum(),
        }
    }
}

/// Computes one interval per resource touched by `ordered_usages`, where the
/// n-th item holds the usages of the n-th scheduled pass. The result is sorted
/// by interval start, then handle id.
pub fn compute_resource_lifetimes<'a>(
    ordered_usages: impl IntoIterator<Item = &'a [ResourceUsageInfo]>,
) -> Vec<ResourceLifetime> {
    let mut lifetimes: HashMap<u32, ResourceLifetime> = HashMap::new();

    for (pass_index, usages) in ordered_usages.into_iter().enumerate() {
        for usage in usages {
            let lifetime = lifetimes
                .entry(usage.handle.id())
                .or_insert_with(|| ResourceLifetime {
                    handle: usage.handle.clone(),
                    first_use: pass_index,
                    last_use: pass_index,
                });
            lifetime.last_use = pass_index;
        }
    }

    let mut lifetimes: Vec<ResourceLifetime> = lifetimes.into_values().collect();
    lifetimes.sort_by_key(|lifetime| (lifetime.first_use, lifetime.handle.id()));
    lifetimes
}

/// Best-fit interval coloring of transient resources.
///
/// A slot is free for a resource when its description is compatible and its
/// last occupant died before the resource is first used. Among free slots the
/// smallest one already large enough wins, ties going to the lowest index.
/// When none is large enough the largest free slot is grown. Other scopes are
/// skipped.
pub fn compute_resource_aliasing(
    lifetimes: &[ResourceLifetime],
    resources: &HashMap<u32, VirtualResource>,
    aliasing_enabled: bool,
) -> AliasingPlan {
    let mut plan = AliasingPlan::default();

    let mut transient: Vec<&ResourceLifetime> = lifetimes
        .iter()
        .filter(|lifetime| {
            resources
                .get(&lifetime.handle.id())
                .is_some_and(|resource| resource.scope.is_aliasable())
        })
        .collect();
    transient.sort_by_key(|lifetime| (lifetime.first_use, lifetime.handle.id()));

    for lifetime in transient {
        let Some(resource) = resources.get(&lifetime.handle.id()) else {
            continue;
        };

        let requested = resource.description.estimated_size();
        let reusable = if aliasing_enabled {
            plan.slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| {
                    slot.lifetime_end < lifetime.first_use
                        && slot.description.can_alias(&resource.description)
                })
                .min_by_key(|(index, slot)| {
                    let size = slot.description.estimated_size();
                    if size >= requested {
                        (false, size - requested, *index)
                    } else {
                        (true, requested - size, *index)
                    }
                })
                .map(|(index, _)| index)
        } else {
            None
        };

        let slot_index = match reusable {
            Some(index) => {
                let slot = &mut plan.slots[index];
                slot.description.absorb(&resource.description);
                slot.lifetime_end = lifetime.last_use;
                slot.occupants.push(lifetime.handle.clone());
                index
            }
            None => {
                plan.slots.push(AliasSlot {
                    description: resource.description.clone(),
                    occupants: vec![lifetime.handle.clone()],
                    lifetime_end: lifetime.last_use,
                });
                plan.slots.len() - 1
            }
        };

        plan.aliases.insert(lifetime.handle.id(), slot_index);
    }

    plan
}

struct PhysicalResource<D: RenderDevice> {
    label: String,
    description: ResourceDescription,
    backing: DeviceResource<D>,
}

/// Physical resources staged by [`ResourceManager::allocate`]. Nothing is
/// published until it is passed to `commit`; `rollback` destroys what it
/// created.
#[derive(Debug, Default)]
pub struct Allocation {
    pub bindings: HashMap<u32, ResourceBinding>,
    pub transient: Vec<PhysicalResourceId>,
    pub persistent: HashMap<String, PhysicalResourceId>,
    pub created: Vec<PhysicalResourceId>,
}

/// Owns every graph-allocated physical resource and the handle generator.
///
/// Handles stay non-owning indices; backing storage lives in this arena and
/// in the caller-provided external bindings.
pub struct ResourceManager<D: RenderDevice> {
    generator: ResourceHandleGenerator,
    next_physical_id: u32,
    physical: BTreeMap<PhysicalResourceId, PhysicalResource<D>>,
    transient: Vec<PhysicalResourceId>,
    persistent: HashMap<String, PhysicalResourceId>,
    external: HashMap<String, DeviceResource<D>>,
}

impl<D: RenderDevice> ResourceManager<D> {
    pub fn new() -> Self {
        Self {
            generator: ResourceHandleGenerator::new(),
            next_physical_id: 1,
            physical: BTreeMap::new(),
            transient: Vec::new(),
            persistent: HashMap::new(),
            external: HashMap::new(),
        }
    }

    pub fn generator(&self) -> &ResourceHandleGenerator {
        &self.generator
    }

    /// Installs the generator of a successful compile and releases every
    /// name that compile did not declare.
    pub fn commit_generator(
        &mut self,
        mut generator: ResourceHandleGenerator,
        declared: &HashSet<u32>,
    ) -> Vec<ResourceHandle> {
        let released = generator.release_unused(declared);
        self.generator = generator;
        released
    }

    /// Assigns physical storage to every scheduled resource.
    ///
    /// Transient slots and persistent resources reuse committed storage whose
    /// description matches exactly; anything else is created on `device`.
    /// On failure everything created by this call is destroyed again.
    pub fn allocate(
        &mut self,
        device: &mut D,
        plan: &AliasingPlan,
        lifetimes: &[ResourceLifetime],
        resources: &HashMap<u32, VirtualResource>,
    ) -> Result<Allocation> {
        let mut allocation = Allocation::default();
        if let Err(error) = self.allocate_into(device, plan, lifetimes, resources, &mut allocation) {
            self.rollback(device, allocation);
            return Err(error);
        }
        Ok(allocation)
    }

    fn allocate_into(
        &mut self,
        device: &mut D,
        plan: &AliasingPlan,
        lifetimes: &[ResourceLifetime],
        resources: &HashMap<u32, VirtualResource>,
        allocation: &mut Allocation,
    ) -> Result<()> {
        let mut claimed: HashSet<PhysicalResourceId> = HashSet::new();

        for (slot_index, slot) in plan.slots.iter().enumerate() {
            let reused = self.transient.iter().copied().find(|id| {
                !claimed.contains(id)
                    && self
                        .physical
                        .get(id)
                        .is_some_and(|physical| physical.description == slot.description)
            });

            let id = match reused {
                Some(id) => id,
                None => {
                    let label = format!("transient_slot_{slot_index}");
                    let id = self.create_physical(device, &label, &slot.description)?;
                    allocation.created.push(id);
                    id
                }
            };
            claimed.insert(id);
            allocation.transient.push(id);

            for occupant in &slot.occupants {
                allocation
                    .bindings
                    .insert(occupant.id(), ResourceBinding::Physical(id));
            }
        }

        for lifetime in lifetimes {
            let Some(resource) = resources.get(&lifetime.handle.id()) else {
                continue;
            };
            let name = resource.handle.name();

            match resource.scope {
                ResourceScope::Transient => {}
                ResourceScope::Persistent => {
                    let reused = self.persistent.get(name).copied().filter(|id| {
                        self.physical
                            .get(id)
                            .is_some_and(|physical| physical.description == resource.description)
                    });

                    let id = match reused {
                        Some(id) => id,
                        None => {
                            let id = self.create_physical(device, name, &resource.description)?;
                            allocation.created.push(id);
                            id
                        }
                    };
                    allocation.persistent.insert(name.to_string(), id);
                    allocation
                        .bindings
                        .insert(resource.handle.id(), ResourceBinding::Physical(id));
                }
                ResourceScope::Imported | ResourceScope::External => {
                    allocation.bindings.insert(
                        resource.handle.id(),
                        ResourceBinding::External(name.to_string()),
                    );
                }
            }
        }

        Ok(())
    }

    fn create_physical(
        &mut self,
        device: &mut D,
        label: &str,
        description: &ResourceDescription,
    ) -> Result<PhysicalResourceId> {
        let backing = device.create_resource(label, description)?;
        let id = PhysicalResourceId::new(self.next_physical_id);
        self.next_physical_id += 1;

        log::debug!("Created physical resource {id:?} '{label}'");
        self.physical.insert(
            id,
            PhysicalResource {
                label: label.to_string(),
                description: description.clone(),
                backing,
            },
        );
        Ok(id)
    }

    /// Publishes `allocation` and destroys committed storage it no longer uses.
    pub fn commit(&mut self, device: &mut D, allocation: Allocation) {
        let in_use: HashSet<PhysicalResourceId> = allocation
            .transient
            .iter()
            .chain(allocation.persistent.values())
            .copied()
            .collect();

        let retired: Vec<PhysicalResourceId> = self
            .physical
            .keys()
            .filter(|id| !in_use.contains(id))
            .copied()
            .collect();
        for id in retired {
            self.destroy_physical(device, id);
        }

        self.transient = allocation.transient;
        self.persistent = allocation.persistent;
    }

    /// Destroys the storage created for an allocation that will not be
    /// published. Committed storage is untouched.
    pub fn rollback(&mut self, device: &mut D, allocation: Allocation) {
        for id in allocation.created {
            self.destroy_physical(device, id);
        }
    }

    fn destroy_physical(&mut self, device: &mut D, id: PhysicalResourceId) {
        if let Some(physical) = self.physical.remove(&id) {
            log::debug!("Destroying physical resource {id:?} '{}'", physical.label);
            device.destroy_resource(physical.backing);
        }
    }

    pub fn backing(&self, binding: &ResourceBinding) -> Option<&DeviceResource<D>> {
        match binding {
            ResourceBinding::Physical(id) => self.physical.get(id).map(|physical| &physical.backing),
            ResourceBinding::External(name) => self.external.get(name),
        }
    }

    pub fn physical_description(&self, id: PhysicalResourceId) -> Option<&ResourceDescription> {
        self.physical.get(&id).map(|physical| &physical.description)
    }

    pub fn physical_count(&self) -> usize {
        self.physical.len()
    }

    pub fn bind_external(
        &mut self,
        name: &str,
        backing: DeviceResource<D>,
    ) -> Option<DeviceResource<D>> {
        self.external.insert(name.to_string(), backing)
    }

    pub fn unbind_external(&mut self, name: &str) -> Option<DeviceResource<D>> {
        self.external.remove(name)
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.external.contains_key(name)
    }

    /// Destroys all graph-owned storage. External bindings stay with the caller.
    pub fn release_all(&mut self, device: &mut D) -> usize {
        let ids: Vec<PhysicalResourceId> = self.physical.keys().copied().collect();
        let count = ids.len();
        for id in ids {
            self.destroy_physical(device, id);
        }
        self.transient.clear();
        self.persistent.clear();
        count
    }
}

impl<D: RenderDevice> Default for ResourceManager<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiled::Barrier;
    use crate::device::{BackingResource, CommandBuffer};
    use crate::handle::ResourceKind;
    use crate::resource::{
        AccessType, RenderGraphBufferDescriptor, RenderGraphTextureDescriptor, ResourceState,
    };

    #[derive(Default)]
    struct CountingDevice {
        next: u32,
        destroyed: Vec<u32>,
        fail_after: Option<u32>,
    }

    struct NullCommands;

    impl CommandBuffer for NullCommands {
        type Texture = u32;
        type Buffer = u32;

        fn resource_barrier(&mut self, _barrier: &Barrier, _resource: &BackingResource<u32, u32>) {}
    }

    impl RenderDevice for CountingDevice {
        type Texture = u32;
        type Buffer = u32;
        type CommandBuffer = NullCommands;

        fn create_texture(&mut self, label: &str, _: &RenderGraphTextureDescriptor) -> Result<u32> {
            if self.fail_after.is_some_and(|limit| self.next >= limit) {
                return Err(crate::error::RenderGraphError::Device(format!(
                    "out of memory creating '{label}'"
                )));
            }
            self.next += 1;
            Ok(self.next)
        }

        fn create_buffer(&mut self, label: &str, _: &RenderGraphBufferDescriptor) -> Result<u32> {
            if self.fail_after.is_some_and(|limit| self.next >= limit) {
                return Err(crate::error::RenderGraphError::Device(format!(
                    "out of memory creating '{label}'"
                )));
            }
            self.next += 1;
            Ok(self.next)
        }

        fn destroy_texture(&mut self, texture: u32) {
            self.destroyed.push(texture);
        }

        fn destroy_buffer(&mut self, buffer: u32) {
            self.destroyed.push(buffer);
        }

        fn create_command_buffer(&mut self, _label: &str) -> Result<NullCommands> {
            Ok(NullCommands)
        }
    }

    fn texture(id: u32, name: &str, scope: ResourceScope) -> VirtualResource {
        VirtualResource {
            handle: ResourceHandle::new(id, ResourceKind::Texture, 1, name),
            description: ResourceDescription::Texture(RenderGraphTextureDescriptor::color(64, 64)),
            scope,
            initial_state: ResourceState::Undefined,
            creator: "setup".to_string(),
        }
    }

    fn buffer(id: u32, name: &str, size: u64) -> VirtualResource {
        VirtualResource {
            handle: ResourceHandle::new(id, ResourceKind::Buffer, 1, name),
            description: ResourceDescription::Buffer(RenderGraphBufferDescriptor::new(
                size,
                wgpu::BufferUsages::STORAGE,
            )),
            scope: ResourceScope::Transient,
            initial_state: ResourceState::Undefined,
            creator: "setup".to_string(),
        }
    }

    fn lifetime(resource: &VirtualResource, first_use: usize, last_use: usize) -> ResourceLifetime {
        ResourceLifetime {
            handle: resource.handle.clone(),
            first_use,
            last_use,
        }
    }

    fn table(resources: &[&VirtualResource]) -> HashMap<u32, VirtualResource> {
        resources
            .iter()
            .map(|resource| (resource.handle.id(), (*resource).clone()))
            .collect()
    }

    #[test]
    fn lifetimes_span_first_to_last_use() {
        let a = ResourceHandle::new(1, ResourceKind::Texture, 1, "a");
        let b = ResourceHandle::new(2, ResourceKind::Buffer, 1, "b");
        let usage = |handle: &ResourceHandle, access| ResourceUsageInfo {
            handle: handle.clone(),
            access_type: access,
            required_state: ResourceState::Common,
            pass_name: "p".to_string(),
        };

        let passes = [
            vec![usage(&a, AccessType::Write)],
            vec![usage(&b, AccessType::Write)],
            vec![usage(&a, AccessType::Read), usage(&b, AccessType::Read)],
            vec![usage(&b, AccessType::Read)],
        ];
        let lifetimes = compute_resource_lifetimes(passes.iter().map(Vec::as_slice));

        assert_eq!(lifetimes.len(), 2);
        assert_eq!((lifetimes[0].first_use, lifetimes[0].last_use), (0, 2));
        assert_eq!((lifetimes[1].first_use, lifetimes[1].last_use), (1, 3));
        assert!(lifetimes[0].overlaps(&lifetimes[1]));
    }

    #[test]
    fn disjoint_compatible_resources_share_a_slot() {
        let a = texture(1, "a", ResourceScope::Transient);
        let b = texture(2, "b", ResourceScope::Transient);
        let c = texture(3, "c", ResourceScope::Transient);
        let resources = table(&[&a, &b, &c]);

        let plan = compute_resource_aliasing(
            &[lifetime(&a, 0, 1), lifetime(&b, 1, 2), lifetime(&c, 2, 3)],
            &resources,
            true,
        );

        assert_eq!(plan.slots.len(), 2);
        assert_eq!(plan.aliases[&1], plan.aliases[&3]);
        assert_ne!(plan.aliases[&1], plan.aliases[&2]);

        let stats = plan.stats(&resources);
        assert_eq!(stats.virtual_resources, 3);
        assert_eq!(stats.physical_resources, 2);
        assert_eq!(stats.saved_bytes(), stats.requested_bytes / 3);
    }

    #[test]
    fn smallest_sufficient_slot_is_reused_before_growing() {
        let large = buffer(1, "large", 1024);
        let small = buffer(2, "small", 256);
        let medium = buffer(3, "medium", 200);
        let huge = buffer(4, "huge", 2048);
        let resources = table(&[&large, &small, &medium, &huge]);

        let plan = compute_resource_aliasing(
            &[
                lifetime(&large, 0, 0),
                lifetime(&small, 0, 0),
                lifetime(&medium, 1, 1),
                lifetime(&huge, 2, 2),
            ],
            &resources,
            true,
        );

        assert_eq!(plan.slots.len(), 2);
        assert_eq!(plan.aliases[&3], plan.aliases[&2]);
        assert_eq!(plan.aliases[&4], plan.aliases[&1]);
        assert_eq!(plan.slots[plan.aliases[&2]].description.estimated_size(), 256);
        assert_eq!(plan.slots[plan.aliases[&1]].description.estimated_size(), 2048);
    }

    #[test]
    fn incompatible_or_disabled_resources_get_dedicated_slots() {
        let a = texture(1, "a", ResourceScope::Transient);
        let mut depth = texture(2, "depth", ResourceScope::Transient);
        depth.description = ResourceDescription::Texture(RenderGraphTextureDescriptor::depth(64, 64));
        let b = texture(3, "b", ResourceScope::Transient);
        let resources = table(&[&a, &depth, &b]);
        let lifetimes = [lifetime(&a, 0, 0), lifetime(&depth, 1, 1), lifetime(&b, 2, 2)];

        let plan = compute_resource_aliasing(&lifetimes, &resources, true);
        assert_eq!(plan.slots.len(), 2);
        assert_ne!(plan.aliases[&1], plan.aliases[&2]);

        let plan = compute_resource_aliasing(&lifetimes, &resources, false);
        assert_eq!(plan.slots.len(), 3);
    }

    #[test]
    fn non_transient_resources_are_never_aliased() {
        let a = texture(1, "a", ResourceScope::Transient);
        let history = texture(2, "history", ResourceScope::Persistent);
        let swapchain = texture(3, "swapchain", ResourceScope::External);
        let resources = table(&[&a, &history, &swapchain]);

        let plan = compute_resource_aliasing(
            &[lifetime(&a, 0, 0), lifetime(&history, 1, 1), lifetime(&swapchain, 2, 2)],
            &resources,
            true,
        );
        assert_eq!(plan.aliases.len(), 1);
        assert!(plan.aliases.contains_key(&1));
    }

    #[test]
    fn allocation_reuses_committed_storage() {
        let mut device = CountingDevice::default();
        let mut manager = ResourceManager::<CountingDevice>::new();

        let a = texture(1, "a", ResourceScope::Transient);
        let history = texture(2, "history", ResourceScope::Persistent);
        let swapchain = texture(3, "swapchain", ResourceScope::External);
        let resources = table(&[&a, &history, &swapchain]);
        let lifetimes = [lifetime(&a, 0, 0), lifetime(&history, 0, 1), lifetime(&swapchain, 1, 1)];
        let plan = compute_resource_aliasing(&lifetimes, &resources, true);

        let first = manager
            .allocate(&mut device, &plan, &lifetimes, &resources)
            .unwrap();
        assert_eq!(first.created.len(), 2);
        assert_eq!(
            first.bindings[&3],
            ResourceBinding::External("swapchain".to_string())
        );
        let first_bindings = first.bindings.clone();
        manager.commit(&mut device, first);

        let second = manager
            .allocate(&mut device, &plan, &lifetimes, &resources)
            .unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.bindings, first_bindings);
        manager.commit(&mut device, second);

        assert_eq!(manager.physical_count(), 2);
        assert!(device.destroyed.is_empty());

        assert_eq!(manager.release_all(&mut device), 2);
        assert_eq!(device.destroyed.len(), 2);
    }

    #[test]
    fn failed_allocation_destroys_partial_storage() {
        let mut device = CountingDevice {
            fail_after: Some(1),
            ..CountingDevice::default()
        };
        let mut manager = ResourceManager::<CountingDevice>::new();

        let a = texture(1, "a", ResourceScope::Transient);
        let b = texture(2, "b", ResourceScope::Transient);
        let resources = table(&[&a, &b]);
        let lifetimes = [lifetime(&a, 0, 1), lifetime(&b, 1, 1)];
        let plan = compute_resource_aliasing(&lifetimes, &resources, true);

        let error = manager
            .allocate(&mut device, &plan, &lifetimes, &resources)
            .unwrap_err();
        assert!(matches!(error, crate::error::RenderGraphError::Device(_)));
        assert_eq!(device.destroyed, vec![1]);
        assert_eq!(manager.physical_count(), 0);
    }

    #[test]
    fn external_bindings_resolve_by_name() {
        let mut manager = ResourceManager::<CountingDevice>::new();
        assert!(manager.bind_external("swapchain", BackingResource::Texture(42)).is_none());
        assert!(manager.is_bound("swapchain"));

        let binding = ResourceBinding::External("swapchain".to_string());
        assert_eq!(manager.backing(&binding), Some(&BackingResource::Texture(42)));

        assert_eq!(manager.unbind_external("swapchain"), Some(BackingResource::Texture(42)));
        assert!(manager.backing(&binding).is_none());
    }
}
