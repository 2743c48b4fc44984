use crate::error::{RenderGraphError, Result};
use crate::handle::{ResourceHandle, ResourceHandleGenerator, ResourceKind};
use crate::resource::{
    AccessType, ConflictKind, RenderGraphBufferDescriptor, RenderGraphTextureDescriptor,
    ResourceConflict, ResourceDescription, ResourceScope, ResourceState, ResourceUsageInfo,
    VirtualResource,
};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Idle,
    RecordingPass,
}

/// What one pass declared during its setup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassResources {
    pub inputs: Vec<ResourceHandle>,
    pub outputs: Vec<ResourceHandle>,
    pub usages: Vec<ResourceUsageInfo>,
}

#[derive(Debug)]
struct PassRecording {
    pass_name: String,
    resources: Vec<VirtualResource>,
    required_outputs: Vec<ResourceHandle>,
    conflicts: Vec<ResourceConflict>,
    declared: PassResources,
}

pub struct BuilderOutput {
    pub generator: ResourceHandleGenerator,
    pub resources: HashMap<u32, VirtualResource>,
    pub pass_resources: HashMap<String, PassResources>,
    pub required_outputs: HashSet<u32>,
    pub conflicts: Vec<ResourceConflict>,
}

/// Setup-phase API. Every declaration is scoped to the pass currently being
/// recorded and only becomes visible to later passes once that pass is
/// finished.
pub struct RenderGraphBuilder {
    generator: ResourceHandleGenerator,
    resources: HashMap<u32, VirtualResource>,
    declaration_order: Vec<u32>,
    usages: Vec<ResourceUsageInfo>,
    pass_resources: HashMap<String, PassResources>,
    required_outputs: HashSet<u32>,
    conflicts: Vec<ResourceConflict>,
    size_overrides: HashMap<String, (u32, u32)>,
    current: Option<PassRecording>,
}

impl RenderGraphBuilder {
    pub fn new() -> Self {
        Self::with_generator(ResourceHandleGenerator::new())
    }

    pub fn with_generator(generator: ResourceHandleGenerator) -> Self {
        Self {
            generator,
            resources: HashMap::new(),
            declaration_order: Vec::new(),
            usages: Vec::new(),
            pass_resources: HashMap::new(),
            required_outputs: HashSet::new(),
            conflicts: Vec::new(),
            size_overrides: HashMap::new(),
            current: None,
        }
    }

    pub(crate) fn set_size_overrides(&mut self, overrides: HashMap<String, (u32, u32)>) {
        self.size_overrides = overrides;
    }

    pub fn state(&self) -> BuilderState {
        if self.current.is_some() {
            BuilderState::RecordingPass
        } else {
            BuilderState::Idle
        }
    }

    pub fn current_pass(&self) -> Option<&str> {
        self.current
            .as_ref()
            .map(|recording| recording.pass_name.as_str())
    }

    pub fn set_current_pass(&mut self, pass_name: &str) -> Result<()> {
        if let Some(recording) = &self.current {
            return Err(RenderGraphError::AlreadyRecording {
                pass: recording.pass_name.clone(),
            });
        }

        self.current = Some(PassRecording {
            pass_name: pass_name.to_string(),
            resources: Vec::new(),
            required_outputs: Vec::new(),
            conflicts: Vec::new(),
            declared: PassResources::default(),
        });
        Ok(())
    }

    pub fn finish_current_pass(&mut self) -> Result<PassResources> {
        let recording = self
            .current
            .take()
            .ok_or_else(|| RenderGraphError::NotRecording {
                operation: "finish_current_pass".to_string(),
            })?;

        for resource in recording.resources {
            let id = resource.handle.id();
            self.declaration_order.push(id);
            self.resources.insert(id, resource);
        }
        self.required_outputs.extend(
            recording
                .required_outputs
                .iter()
                .map(ResourceHandle::id),
        );
        self.conflicts.extend(recording.conflicts);
        self.usages
            .extend(recording.declared.usages.iter().cloned());
        self.pass_resources
            .insert(recording.pass_name, recording.declared.clone());

        Ok(recording.declared)
    }

    /// Discards everything the current pass declared so far.
    pub fn abort_current_pass(&mut self) {
        if let Some(recording) = self.current.take() {
            log::debug!(
                "Discarding {} declaration(s) of pass '{}'",
                recording.resources.len() + recording.declared.usages.len(),
                recording.pass_name
            );
        }
    }

    pub fn create_texture(
        &mut self,
        name: &str,
        descriptor: RenderGraphTextureDescriptor,
    ) -> Result<ResourceHandle> {
        self.declare(
            "create_texture",
            name,
            ResourceDescription::Texture(descriptor),
            ResourceScope::Transient,
            ResourceState::Undefined,
        )
    }

    pub fn create_buffer(
        &mut self,
        name: &str,
        descriptor: RenderGraphBufferDescriptor,
    ) -> Result<ResourceHandle> {
        self.declare(
            "create_buffer",
            name,
            ResourceDescription::Buffer(descriptor),
            ResourceScope::Transient,
            ResourceState::Undefined,
        )
    }

    pub fn create_persistent_texture(
        &mut self,
        name: &str,
        descriptor: RenderGraphTextureDescriptor,
    ) -> Result<ResourceHandle> {
        self.declare(
            "create_persistent_texture",
            name,
            ResourceDescription::Texture(descriptor),
            ResourceScope::Persistent,
            ResourceState::Common,
        )
    }

    pub fn create_persistent_buffer(
        &mut self,
        name: &str,
        descriptor: RenderGraphBufferDescriptor,
    ) -> Result<ResourceHandle> {
        self.declare(
            "create_persistent_buffer",
            name,
            ResourceDescription::Buffer(descriptor),
            ResourceScope::Persistent,
            ResourceState::Common,
        )
    }

    pub fn import_texture(
        &mut self,
        name: &str,
        descriptor: RenderGraphTextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<ResourceHandle> {
        self.declare(
            "import_texture",
            name,
            ResourceDescription::Texture(descriptor),
            ResourceScope::Imported,
            initial_state,
        )
    }

    pub fn import_buffer(
        &mut self,
        name: &str,
        descriptor: RenderGraphBufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<ResourceHandle> {
        self.declare(
            "import_buffer",
            name,
            ResourceDescription::Buffer(descriptor),
            ResourceScope::Imported,
            initial_state,
        )
    }

    pub fn external_texture(
        &mut self,
        name: &str,
        descriptor: RenderGraphTextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<ResourceHandle> {
        self.declare(
            "external_texture",
            name,
            ResourceDescription::Texture(descriptor),
            ResourceScope::External,
            initial_state,
        )
    }

    pub fn external_buffer(
        &mut self,
        name: &str,
        descriptor: RenderGraphBufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<ResourceHandle> {
        self.declare(
            "external_buffer",
            name,
            ResourceDescription::Buffer(descriptor),
            ResourceScope::External,
            initial_state,
        )
    }

    /// Looks up a resource declared earlier in this compile.
    pub fn find_resource(&self, name: &str) -> Option<ResourceHandle> {
        self.resource_named(name)
            .map(|resource| resource.handle.clone())
    }

    pub fn resource(&self, handle: &ResourceHandle) -> Option<&VirtualResource> {
        self.resolve(handle).ok()
    }

    pub fn read(&mut self, handle: &ResourceHandle, state: ResourceState) -> Result<ResourceHandle> {
        self.track("read", handle, AccessType::Read, state, None)
    }

    pub fn write(&mut self, handle: &ResourceHandle, state: ResourceState) -> Result<ResourceHandle> {
        self.track("write", handle, AccessType::Write, state, None)
    }

    pub fn read_write(
        &mut self,
        handle: &ResourceHandle,
        state: ResourceState,
    ) -> Result<ResourceHandle> {
        self.track("read_write", handle, AccessType::ReadWrite, state, None)
    }

    pub fn read_texture(&mut self, handle: &ResourceHandle) -> Result<ResourceHandle> {
        self.track(
            "read_texture",
            handle,
            AccessType::Read,
            ResourceState::ShaderResource,
            Some(ResourceKind::Texture),
        )
    }

    pub fn write_texture(&mut self, handle: &ResourceHandle) -> Result<ResourceHandle> {
        self.track(
            "write_texture",
            handle,
            AccessType::Write,
            ResourceState::RenderTarget,
            Some(ResourceKind::Texture),
        )
    }

    pub fn read_write_texture(&mut self, handle: &ResourceHandle) -> Result<ResourceHandle> {
        self.track(
            "read_write_texture",
            handle,
            AccessType::ReadWrite,
            ResourceState::UnorderedAccess,
            Some(ResourceKind::Texture),
        )
    }

    pub fn read_depth(&mut self, handle: &ResourceHandle) -> Result<ResourceHandle> {
        self.track(
            "read_depth",
            handle,
            AccessType::Read,
            ResourceState::DepthRead,
            Some(ResourceKind::Texture),
        )
    }

    pub fn write_depth(&mut self, handle: &ResourceHandle) -> Result<ResourceHandle> {
        self.track(
            "write_depth",
            handle,
            AccessType::Write,
            ResourceState::DepthWrite,
            Some(ResourceKind::Texture),
        )
    }

    pub fn read_buffer(&mut self, handle: &ResourceHandle) -> Result<ResourceHandle> {
        self.track(
            "read_buffer",
            handle,
            AccessType::Read,
            ResourceState::ShaderResource,
            Some(ResourceKind::Buffer),
        )
    }

    pub fn write_buffer(&mut self, handle: &ResourceHandle) -> Result<ResourceHandle> {
        self.track(
            "write_buffer",
            handle,
            AccessType::Write,
            ResourceState::UnorderedAccess,
            Some(ResourceKind::Buffer),
        )
    }

    pub fn read_write_buffer(&mut self, handle: &ResourceHandle) -> Result<ResourceHandle> {
        self.track(
            "read_write_buffer",
            handle,
            AccessType::ReadWrite,
            ResourceState::UnorderedAccess,
            Some(ResourceKind::Buffer),
        )
    }

    /// Marks a resource as a required graph output; its writers survive culling.
    pub fn mark_output(&mut self, handle: &ResourceHandle) -> Result<()> {
        self.recording("mark_output")?;
        self.resolve(handle)?;
        let recording = self.recording_mut("mark_output")?;
        if !recording.required_outputs.contains(handle) {
            recording.required_outputs.push(handle.clone());
        }
        Ok(())
    }

    pub fn usages(&self) -> &[ResourceUsageInfo] {
        &self.usages
    }

    pub fn pass_resources(&self, pass_name: &str) -> Option<&PassResources> {
        self.pass_resources.get(pass_name)
    }

    pub fn declared_resources(&self) -> impl Iterator<Item = &VirtualResource> {
        self.declaration_order
            .iter()
            .filter_map(|id| self.resources.get(id))
    }

    pub fn required_outputs(&self) -> &HashSet<u32> {
        &self.required_outputs
    }

    /// Collects state conflicts recorded within a pass, reads whose state
    /// clashes with another pass's use of the same resource, and transient
    /// resources that are read but never written.
    ///
    /// Clashes between two writers are reported by the dependency resolver.
    pub fn validate_resource_usages(&self) -> Vec<ResourceConflict> {
        let mut conflicts = self.conflicts.clone();

        let mut by_handle: BTreeMap<u32, Vec<&ResourceUsageInfo>> = BTreeMap::new();
        for usage in &self.usages {
            by_handle.entry(usage.handle.id()).or_default().push(usage);
        }
        for usages in by_handle.values() {
            let clash = usages.iter().enumerate().find_map(|(position, first)| {
                usages[position + 1..]
                    .iter()
                    .find(|second| {
                        second.pass_name != first.pass_name
                            && (first.access_type.reads() || second.access_type.reads())
                            && !first.required_state.is_compatible_with(second.required_state)
                    })
                    .map(|second| (*first, *second))
            });
            if let Some((first, second)) = clash {
                conflicts.push(ResourceConflict {
                    kind: ConflictKind::IncompatibleStates,
                    resource: first.handle.clone(),
                    passes: vec![first.pass_name.clone(), second.pass_name.clone()],
                    states: vec![first.required_state, second.required_state],
                });
            }
        }

        let written: HashSet<u32> = self
            .usages
            .iter()
            .filter(|usage| usage.access_type.writes())
            .map(|usage| usage.handle.id())
            .collect();

        let mut unwritten_reads: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for usage in &self.usages {
            let id = usage.handle.id();
            let transient = self
                .resources
                .get(&id)
                .is_some_and(|resource| resource.scope == ResourceScope::Transient);
            if transient && usage.access_type.reads() && !written.contains(&id) {
                unwritten_reads
                    .entry(id)
                    .or_default()
                    .push(usage.pass_name.clone());
            }
        }

        for (id, passes) in unwritten_reads {
            if let Some(resource) = self.resources.get(&id) {
                conflicts.push(ResourceConflict {
                    kind: ConflictKind::ReadWithoutWriter,
                    resource: resource.handle.clone(),
                    passes,
                    states: Vec::new(),
                });
            }
        }

        conflicts
    }

    pub fn into_parts(self) -> BuilderOutput {
        let conflicts = self.validate_resource_usages();
        BuilderOutput {
            generator: self.generator,
            resources: self.resources,
            pass_resources: self.pass_resources,
            required_outputs: self.required_outputs,
            conflicts,
        }
    }

    fn recording(&self, operation: &str) -> Result<&PassRecording> {
        self.current
            .as_ref()
            .ok_or_else(|| RenderGraphError::NotRecording {
                operation: operation.to_string(),
            })
    }

    fn recording_mut(&mut self, operation: &str) -> Result<&mut PassRecording> {
        self.current
            .as_mut()
            .ok_or_else(|| RenderGraphError::NotRecording {
                operation: operation.to_string(),
            })
    }

    fn resource_named(&self, name: &str) -> Option<&VirtualResource> {
        self.resources
            .values()
            .find(|resource| resource.handle.name() == name)
            .or_else(|| {
                self.current.as_ref().and_then(|recording| {
                    recording
                        .resources
                        .iter()
                        .find(|resource| resource.handle.name() == name)
                })
            })
    }

    fn resolve(&self, handle: &ResourceHandle) -> Result<&VirtualResource> {
        if !handle.is_valid() {
            return Err(RenderGraphError::InvalidHandle {
                handle: handle.clone(),
            });
        }

        let resource = self
            .resources
            .get(&handle.id())
            .or_else(|| {
                self.current.as_ref().and_then(|recording| {
                    recording
                        .resources
                        .iter()
                        .find(|resource| resource.handle.id() == handle.id())
                })
            })
            .ok_or_else(|| RenderGraphError::InvalidHandle {
                handle: handle.clone(),
            })?;

        if resource.handle.generation() != handle.generation() {
            return Err(RenderGraphError::StaleHandle {
                handle: handle.clone(),
                current: resource.handle.generation(),
            });
        }

        if resource.handle != *handle {
            return Err(RenderGraphError::InvalidHandle {
                handle: handle.clone(),
            });
        }

        Ok(resource)
    }

    fn declare(
        &mut self,
        operation: &str,
        name: &str,
        description: ResourceDescription,
        scope: ResourceScope,
        initial_state: ResourceState,
    ) -> Result<ResourceHandle> {
        let pass_name = self.recording(operation)?.pass_name.clone();

        if name.is_empty() {
            return Err(RenderGraphError::EmptyResourceName { pass: pass_name });
        }

        if let Some(existing) = self.resource_named(name) {
            return Err(RenderGraphError::DuplicateResource {
                resource: name.to_string(),
                owner: existing.creator.clone(),
            });
        }

        let description = match description {
            ResourceDescription::Texture(mut descriptor) if scope == ResourceScope::Transient => {
                if let Some(&(width, height)) = self.size_overrides.get(name) {
                    descriptor.width = width;
                    descriptor.height = height;
                }
                ResourceDescription::Texture(descriptor)
            }
            description => description,
        };

        let handle = self.generator.acquire(name, description.kind());
        log::debug!("Pass '{pass_name}' declared {handle} as {scope:?}");

        let recording = self.recording_mut(operation)?;
        if scope == ResourceScope::External {
            recording.required_outputs.push(handle.clone());
        }
        recording.resources.push(VirtualResource {
            handle: handle.clone(),
            description,
            scope,
            initial_state,
            creator: pass_name,
        });

        Ok(handle)
    }

    fn track(
        &mut self,
        operation: &str,
        handle: &ResourceHandle,
        access: AccessType,
        state: ResourceState,
        expected_kind: Option<ResourceKind>,
    ) -> Result<ResourceHandle> {
        self.recording(operation)?;
        let kind = self.resolve(handle)?.handle.kind();

        if let Some(expected) = expected_kind
            && expected != kind
        {
            return Err(RenderGraphError::TypeMismatch {
                operation: operation.to_string(),
                actual: kind,
                resource: handle.name().to_string(),
            });
        }

        if !state.is_valid_for(kind) || !state.supports(access) {
            return Err(RenderGraphError::InvalidState {
                resource: handle.name().to_string(),
                kind,
                access,
                state,
            });
        }

        let recording = self.recording_mut(operation)?;
        let pass_name = recording.pass_name.clone();

        if let Some(existing) = recording
            .declared
            .usages
            .iter_mut()
            .find(|usage| usage.handle == *handle)
        {
            if existing.required_state != state {
                recording.conflicts.push(ResourceConflict {
                    kind: ConflictKind::IncompatibleStates,
                    resource: handle.clone(),
                    passes: vec![pass_name],
                    states: vec![existing.required_state, state],
                });
            }
            existing.access_type = existing.access_type.merge(access);
        } else {
            recording.declared.usages.push(ResourceUsageInfo {
                handle: handle.clone(),
                access_type: access,
                required_state: state,
                pass_name,
            });
        }

        if access.reads() && !recording.declared.inputs.contains(handle) {
            recording.declared.inputs.push(handle.clone());
        }
        if access.writes() && !recording.declared.outputs.contains(handle) {
            recording.declared.outputs.push(handle.clone());
        }

        Ok(handle.clone())
    }
}

impl Default for RenderGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
