use crate::device::PhysicalResourceId;
use crate::handle::ResourceHandle;
use crate::resolver::CriticalPath;
use crate::resource::{
    ResourceConflict, ResourceScope, ResourceState, ResourceUsageInfo, VirtualResource,
};
use crate::resource_manager::{AliasingStats, ResourceLifetime};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// State change from `before` to `after`.
    Transition,
    /// Same unordered-access state; orders back-to-back storage writes.
    UnorderedAccess,
}

/// Where a handle's storage comes from after compile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceBinding {
    Physical(PhysicalResourceId),
    /// Caller-owned backing looked up by resource name at execute time.
    External(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barrier {
    pub handle: ResourceHandle,
    pub binding: ResourceBinding,
    pub before: ResourceState,
    pub after: ResourceState,
    pub kind: BarrierKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarrierSchedule {
    /// One barrier set per scheduled pass, in execution order.
    pub pass_barriers: Vec<Vec<Barrier>>,
    pub final_states: HashMap<u32, ResourceState>,
}

/// Walks the scheduled usages and emits, per pass, the transitions from each
/// resource's last known state to the state the pass requires.
///
/// Resources missing from `initial_states` start out `Undefined`.
pub fn compute_barriers<'a>(
    ordered_usages: impl IntoIterator<Item = &'a [ResourceUsageInfo]>,
    initial_states: &HashMap<u32, ResourceState>,
    bindings: &HashMap<u32, ResourceBinding>,
) -> BarrierSchedule {
    let mut states = initial_states.clone();
    let mut touched: HashSet<u32> = HashSet::new();
    let mut pass_barriers = Vec::new();

    for usages in ordered_usages {
        let mut barriers = Vec::new();

        for usage in usages {
            let id = usage.handle.id();
            let before = states
                .get(&id)
                .copied()
                .unwrap_or(ResourceState::Undefined);
            let after = usage.required_state;

            let kind = if before != after {
                Some(BarrierKind::Transition)
            } else if after == ResourceState::UnorderedAccess && touched.contains(&id) {
                Some(BarrierKind::UnorderedAccess)
            } else {
                None
            };

            if let Some(kind) = kind
                && let Some(binding) = bindings.get(&id)
            {
                barriers.push(Barrier {
                    handle: usage.handle.clone(),
                    binding: binding.clone(),
                    before,
                    after,
                    kind,
                });
            }

            states.insert(id, after);
            touched.insert(id);
        }

        pass_barriers.push(barriers);
    }

    BarrierSchedule {
        pass_barriers,
        final_states: states,
    }
}

/// Barriers returning non-transient resources to their declared initial
/// state once the frame's passes have run.
pub fn compute_restore_barriers<'a>(
    resources: impl IntoIterator<Item = &'a VirtualResource>,
    final_states: &HashMap<u32, ResourceState>,
    bindings: &HashMap<u32, ResourceBinding>,
) -> Vec<Barrier> {
    let mut barriers: Vec<Barrier> = resources
        .into_iter()
        .filter(|resource| {
            resource.scope != ResourceScope::Transient
                && resource.initial_state != ResourceState::Undefined
        })
        .filter_map(|resource| {
            let id = resource.handle.id();
            let current = final_states.get(&id).copied()?;
            let binding = bindings.get(&id)?;
            (current != resource.initial_state).then(|| Barrier {
                handle: resource.handle.clone(),
                binding: binding.clone(),
                before: current,
                after: resource.initial_state,
                kind: BarrierKind::Transition,
            })
        })
        .collect();

    barriers.sort_by_key(|barrier| barrier.handle.id());
    barriers
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPass {
    pub name: String,
    pub registration_index: usize,
    /// Scheduled passes that must have run this frame for this one to run.
    pub dependencies: Vec<String>,
    pub usages: Vec<ResourceUsageInfo>,
    pub barriers: Vec<Barrier>,
}

/// Immutable result of a successful compile.
#[derive(Debug, Clone, Default)]
pub struct CompiledRenderGraph {
    pub(crate) passes: Vec<CompiledPass>,
    pub(crate) culled: Vec<String>,
    pub(crate) resources: HashMap<u32, VirtualResource>,
    pub(crate) bindings: HashMap<u32, ResourceBinding>,
    pub(crate) restore_barriers: Vec<Barrier>,
    pub(crate) lifetimes: Vec<ResourceLifetime>,
    pub(crate) aliasing: AliasingStats,
    pub(crate) critical_path: CriticalPath,
    pub(crate) diagnostics: Vec<ResourceConflict>,
}

impl CompiledRenderGraph {
    pub fn passes(&self) -> &[CompiledPass] {
        &self.passes
    }

    pub fn pass(&self, name: &str) -> Option<&CompiledPass> {
        self.passes.iter().find(|pass| pass.name == name)
    }

    pub fn execution_order(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name.as_str()).collect()
    }

    pub fn culled_passes(&self) -> &[String] {
        &self.culled
    }

    /// Binding of `handle`, provided it matches the handle this graph was
    /// compiled with.
    pub fn binding(&self, handle: &ResourceHandle) -> Option<&ResourceBinding> {
        self.resource(handle)?;
        self.bindings.get(&handle.id())
    }

    pub fn physical_id(&self, handle: &ResourceHandle) -> Option<PhysicalResourceId> {
        match self.binding(handle)? {
            ResourceBinding::Physical(id) => Some(*id),
            ResourceBinding::External(_) => None,
        }
    }

    pub fn resource(&self, handle: &ResourceHandle) -> Option<&VirtualResource> {
        self.resources
            .get(&handle.id())
            .filter(|resource| resource.handle == *handle)
    }

    pub fn find_resource(&self, name: &str) -> Option<&VirtualResource> {
        self.resources
            .values()
            .find(|resource| resource.handle.name() == name)
    }

    pub fn restore_barriers(&self) -> &[Barrier] {
        &self.restore_barriers
    }

    pub fn barrier_count(&self) -> usize {
        self.passes
            .iter()
            .map(|pass| pass.barriers.len())
            .sum::<usize>()
            + self.restore_barriers.len()
    }

    pub fn lifetime(&self, handle: &ResourceHandle) -> Option<&ResourceLifetime> {
        self.lifetimes
            .iter()
            .find(|lifetime| lifetime.handle == *handle)
    }

    pub fn aliasing_stats(&self) -> AliasingStats {
        self.aliasing
    }

    pub fn critical_path(&self) -> &CriticalPath {
        &self.critical_path
    }

    pub fn diagnostics(&self) -> &[ResourceConflict] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ResourceKind;
    use crate::resource::{AccessType, RenderGraphTextureDescriptor, ResourceDescription};

    fn handle(id: u32, name: &str) -> ResourceHandle {
        ResourceHandle::new(id, ResourceKind::Texture, 1, name)
    }

    fn usage(handle: &ResourceHandle, access: AccessType, state: ResourceState) -> ResourceUsageInfo {
        ResourceUsageInfo {
            handle: handle.clone(),
            access_type: access,
            required_state: state,
            pass_name: "pass".to_string(),
        }
    }

    fn physical(ids: &[u32]) -> HashMap<u32, ResourceBinding> {
        ids.iter()
            .map(|&id| (id, ResourceBinding::Physical(PhysicalResourceId::new(id))))
            .collect()
    }

    #[test]
    fn transitions_follow_required_states() {
        let color = handle(1, "color");
        let passes = [
            vec![usage(&color, AccessType::Write, ResourceState::RenderTarget)],
            vec![usage(&color, AccessType::Read, ResourceState::ShaderResource)],
            vec![usage(&color, AccessType::Read, ResourceState::ShaderResource)],
        ];

        let schedule = compute_barriers(
            passes.iter().map(Vec::as_slice),
            &HashMap::new(),
            &physical(&[1]),
        );

        assert_eq!(schedule.pass_barriers.len(), 3);
        let first = &schedule.pass_barriers[0][0];
        assert_eq!(
            (first.before, first.after),
            (ResourceState::Undefined, ResourceState::RenderTarget)
        );
        let second = &schedule.pass_barriers[1][0];
        assert_eq!(
            (second.before, second.after),
            (ResourceState::RenderTarget, ResourceState::ShaderResource)
        );
        assert!(schedule.pass_barriers[2].is_empty());
        assert_eq!(schedule.final_states[&1], ResourceState::ShaderResource);
    }

    #[test]
    fn repeated_unordered_access_gets_uav_barrier() {
        let particles = handle(1, "particles");
        let passes = [
            vec![usage(&particles, AccessType::ReadWrite, ResourceState::UnorderedAccess)],
            vec![usage(&particles, AccessType::ReadWrite, ResourceState::UnorderedAccess)],
        ];
        let initial = HashMap::from([(1, ResourceState::UnorderedAccess)]);

        let schedule = compute_barriers(passes.iter().map(Vec::as_slice), &initial, &physical(&[1]));

        assert!(schedule.pass_barriers[0].is_empty());
        assert_eq!(schedule.pass_barriers[1].len(), 1);
        assert_eq!(schedule.pass_barriers[1][0].kind, BarrierKind::UnorderedAccess);
    }

    #[test]
    fn aliased_resources_track_state_per_handle() {
        let first = handle(1, "first");
        let second = handle(2, "second");
        let shared = HashMap::from([
            (1, ResourceBinding::Physical(PhysicalResourceId::new(7))),
            (2, ResourceBinding::Physical(PhysicalResourceId::new(7))),
        ]);
        let passes = [
            vec![usage(&first, AccessType::Write, ResourceState::RenderTarget)],
            vec![usage(&second, AccessType::Write, ResourceState::RenderTarget)],
        ];

        let schedule = compute_barriers(passes.iter().map(Vec::as_slice), &HashMap::new(), &shared);
        let barrier = &schedule.pass_barriers[1][0];
        assert_eq!(barrier.before, ResourceState::Undefined);
        assert_eq!(barrier.binding, ResourceBinding::Physical(PhysicalResourceId::new(7)));
    }

    #[test]
    fn restore_barriers_return_non_transient_resources() {
        let description = ResourceDescription::Texture(RenderGraphTextureDescriptor::color(4, 4));
        let resource = |id: u32, name: &str, scope, initial_state| VirtualResource {
            handle: handle(id, name),
            description: description.clone(),
            scope,
            initial_state,
            creator: "setup".to_string(),
        };
        let resources = [
            resource(1, "transient", ResourceScope::Transient, ResourceState::Undefined),
            resource(2, "history", ResourceScope::Persistent, ResourceState::Common),
            resource(3, "swapchain", ResourceScope::External, ResourceState::Present),
            resource(4, "lut", ResourceScope::Imported, ResourceState::ShaderResource),
        ];
        let final_states = HashMap::from([
            (1, ResourceState::ShaderResource),
            (2, ResourceState::ShaderResource),
            (3, ResourceState::RenderTarget),
            (4, ResourceState::ShaderResource),
        ]);

        let barriers = compute_restore_barriers(&resources, &final_states, &physical(&[1, 2, 3, 4]));
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].handle.name(), "history");
        assert_eq!(barriers[0].after, ResourceState::Common);
        assert_eq!(barriers[1].handle.name(), "swapchain");
        assert_eq!(
            (barriers[1].before, barriers[1].after),
            (ResourceState::RenderTarget, ResourceState::Present)
        );
    }

    #[test]
    fn binding_requires_the_compiled_handle() {
        let color = handle(1, "color");
        let mut graph = CompiledRenderGraph::default();
        graph.resources.insert(
            1,
            VirtualResource {
                handle: color.clone(),
                description: ResourceDescription::Texture(RenderGraphTextureDescriptor::color(4, 4)),
                scope: ResourceScope::Transient,
                initial_state: ResourceState::Undefined,
                creator: "setup".to_string(),
            },
        );
        graph.bindings = physical(&[1]);

        assert_eq!(graph.physical_id(&color), Some(PhysicalResourceId::new(1)));
        let stale = ResourceHandle::new(1, ResourceKind::Texture, 2, "color");
        assert!(graph.binding(&stale).is_none());
    }
}
