use crate::builder::RenderGraphBuilder;
use crate::compiled::{
    CompiledPass, CompiledRenderGraph, compute_barriers, compute_restore_barriers,
};
use crate::config::{RenderGraphConfig, ResilienceMode};
use crate::device::{CommandBuffer, DeviceResource, RenderDevice};
use crate::error::{RenderGraphError, Result};
use crate::handle::ResourceKind;
use crate::observer::PassObservers;
use crate::pass::{FrameData, PassStatistics, RenderPass, RenderPassContext};
use crate::resolver::{CriticalPath, DependencyResolver, GraphNode};
use crate::resource::{ResourceConflict, ResourceScope, ResourceState, ResourceUsageInfo};
use crate::resource_manager::{compute_resource_aliasing, compute_resource_lifetimes, ResourceManager};
use std::collections::{HashMap, HashSet};
use web_time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Uncompiled,
    Compiling,
    Compiled,
}

struct PassEntry<D: RenderDevice> {
    pass: Box<dyn RenderPass<D>>,
    dependencies: Vec<String>,
    enabled: bool,
    statistics: PassStatistics,
}

/// Owns the registered passes and the resource manager, compiles them into a
/// [`CompiledRenderGraph`] and executes that artifact frame after frame.
pub struct RenderGraph<D: RenderDevice> {
    passes: Vec<PassEntry<D>>,
    config: RenderGraphConfig,
    state: GraphState,
    compiled: Option<CompiledRenderGraph>,
    resources: ResourceManager<D>,
    frame: FrameData,
    observers: PassObservers,
    size_overrides: HashMap<String, (u32, u32)>,
}

impl<D: RenderDevice> RenderGraph<D> {
    pub fn new() -> Self {
        Self::with_config(RenderGraphConfig::default())
    }

    pub fn with_config(config: RenderGraphConfig) -> Self {
        Self {
            passes: Vec::new(),
            config,
            state: GraphState::Uncompiled,
            compiled: None,
            resources: ResourceManager::new(),
            frame: FrameData::default(),
            observers: PassObservers::new(),
            size_overrides: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RenderGraphConfig {
        &self.config
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn add_pass(&mut self, pass: Box<dyn RenderPass<D>>) -> Result<()> {
        let name = pass.name().to_string();
        if self.entry_index(&name).is_some() {
            return Err(RenderGraphError::DuplicatePass { pass: name });
        }

        log::debug!("Registered pass '{name}'");
        self.passes.push(PassEntry {
            pass,
            dependencies: Vec::new(),
            enabled: true,
            statistics: PassStatistics::new(name),
        });
        self.state = GraphState::Uncompiled;
        Ok(())
    }

    /// Unregisters a pass. The published artifact keeps running without it
    /// until the next compile.
    pub fn remove_pass(&mut self, name: &str) -> Result<Box<dyn RenderPass<D>>> {
        let index = self
            .entry_index(name)
            .ok_or_else(|| RenderGraphError::PassNotFound {
                pass: name.to_string(),
            })?;

        self.state = GraphState::Uncompiled;
        Ok(self.passes.remove(index).pass)
    }

    /// Makes `pass` run after `depends_on`.
    pub fn add_dependency(&mut self, pass: &str, depends_on: &str) -> Result<()> {
        let index = self
            .entry_index(pass)
            .ok_or_else(|| RenderGraphError::PassNotFound {
                pass: pass.to_string(),
            })?;

        let dependencies = &mut self.passes[index].dependencies;
        if !dependencies.iter().any(|dependency| dependency == depends_on) {
            dependencies.push(depends_on.to_string());
            self.state = GraphState::Uncompiled;
        }
        Ok(())
    }

    pub fn set_pass_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let index = self
            .entry_index(name)
            .ok_or_else(|| RenderGraphError::PassNotFound {
                pass: name.to_string(),
            })?;
        self.passes[index].enabled = enabled;
        Ok(())
    }

    pub fn has_pass(&self, name: &str) -> bool {
        self.entry_index(name).is_some()
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|entry| entry.pass.name()).collect()
    }

    fn entry_index(&self, name: &str) -> Option<usize> {
        self.passes.iter().position(|entry| entry.pass.name() == name)
    }

    /// Runs every pass's setup, resolves the schedule, assigns physical
    /// resources and precomputes barriers.
    ///
    /// The new artifact is published only if every step succeeds; on failure
    /// the previous artifact and the handles it was built with stay valid.
    pub fn compile(&mut self, device: &mut D) -> Result<()> {
        let previous_state = self.state;
        self.state = GraphState::Compiling;

        let start = Instant::now();
        match self.build_artifact(device) {
            Ok(compiled) => {
                log::info!(
                    "Compiled render graph in {:?}: {} passes, {} culled, {} physical resources for {} transient resources",
                    start.elapsed(),
                    compiled.passes().len(),
                    compiled.culled_passes().len(),
                    self.resources.physical_count(),
                    compiled.aliasing_stats().virtual_resources
                );
                self.compiled = Some(compiled);
                self.state = GraphState::Compiled;
                Ok(())
            }
            Err(error) => {
                log::warn!("Render graph compile failed: {error}");
                self.state = previous_state;
                Err(error)
            }
        }
    }

    fn build_artifact(&mut self, device: &mut D) -> Result<CompiledRenderGraph> {
        let mut builder = RenderGraphBuilder::with_generator(self.resources.generator().clone());
        builder.set_size_overrides(self.size_overrides.clone());

        let mut included: Vec<usize> = Vec::new();
        let mut excluded: HashSet<String> = HashSet::new();

        for (index, entry) in self.passes.iter_mut().enumerate() {
            let name = entry.pass.name().to_string();
            builder.set_current_pass(&name)?;

            match entry.pass.setup(&mut builder) {
                Ok(()) => {
                    builder.finish_current_pass()?;
                    self.observers.notify_setup(&name);
                    included.push(index);
                }
                Err(source) => {
                    builder.abort_current_pass();
                    let error = RenderGraphError::PassSetupFailed {
                        pass: name.clone(),
                        source: Box::new(source),
                    };
                    entry.statistics.record_failure(None, &error);
                    self.observers.notify_error(&name, &error);

                    if self.config.resilience == ResilienceMode::Abort {
                        return Err(error);
                    }
                    log::error!("{error}; excluding it from this compile");
                    excluded.insert(name);
                }
            }
        }

        // Passes explicitly depending on an excluded pass cannot run either.
        loop {
            let before = included.len();
            included.retain(|&index| {
                let entry = &self.passes[index];
                let blocked = entry
                    .dependencies
                    .iter()
                    .any(|dependency| excluded.contains(dependency));
                if blocked {
                    log::warn!(
                        "Excluding pass '{}': a dependency failed setup",
                        entry.pass.name()
                    );
                    excluded.insert(entry.pass.name().to_string());
                }
                !blocked
            });
            if included.len() == before {
                break;
            }
        }

        let output = builder.into_parts();

        let nodes: Vec<GraphNode> = included
            .iter()
            .map(|&index| {
                let entry = &self.passes[index];
                let name = entry.pass.name().to_string();
                let usages = output
                    .pass_resources
                    .get(&name)
                    .map(|declared| declared.usages.clone())
                    .unwrap_or_default();
                GraphNode {
                    priority: entry.pass.priority(),
                    always_execute: entry.pass.always_execute(),
                    dependencies: entry.dependencies.clone(),
                    usages,
                    duration: entry.statistics.last_execution_time,
                    name,
                }
            })
            .collect();

        let resolver = DependencyResolver::build_dependency_graph(nodes)?;

        if let Some((pass, dependency)) = resolver.unknown_dependencies().first() {
            return Err(RenderGraphError::UnknownDependency {
                pass: pass.clone(),
                dependency: dependency.clone(),
            });
        }

        let live = resolver.cull_unused_passes(&output.required_outputs);

        let cycle = resolver.detect_cycles();
        match cycle.as_slice() {
            [] => {}
            [pass] => return Err(RenderGraphError::SelfDependency { pass: pass.clone() }),
            _ => return Err(RenderGraphError::CyclicDependency { passes: cycle }),
        }

        let order = resolver.topological_sort(&live)?;

        let culled: Vec<String> = (0..resolver.node_count())
            .map(petgraph::graph::NodeIndex::new)
            .filter(|index| !live.contains(index))
            .map(|index| resolver.node(index).name.clone())
            .collect();
        for name in &culled {
            log::warn!("Culled pass '{name}': it contributes to no required output");
        }

        let mut diagnostics: Vec<ResourceConflict> = output.conflicts.clone();
        diagnostics.extend(resolver.conflicts().iter().cloned());
        if self.config.is_strict() && !diagnostics.is_empty() {
            return Err(RenderGraphError::StrictValidation {
                conflicts: diagnostics,
            });
        }
        for conflict in &diagnostics {
            log::warn!("Resource conflict: {conflict}");
        }

        let ordered_usages: Vec<&[ResourceUsageInfo]> = order
            .iter()
            .map(|&index| resolver.node(index).usages.as_slice())
            .collect();

        let lifetimes = compute_resource_lifetimes(ordered_usages.iter().copied());
        let plan = compute_resource_aliasing(
            &lifetimes,
            &output.resources,
            self.config.aliasing_enabled,
        );
        let allocation = self
            .resources
            .allocate(device, &plan, &lifetimes, &output.resources)?;

        let initial_states: HashMap<u32, ResourceState> = output
            .resources
            .iter()
            .map(|(&id, resource)| (id, resource.initial_state))
            .collect();
        let schedule = compute_barriers(
            ordered_usages.iter().copied(),
            &initial_states,
            &allocation.bindings,
        );
        let restore_barriers = compute_restore_barriers(
            output.resources.values(),
            &schedule.final_states,
            &allocation.bindings,
        );

        let passes: Vec<CompiledPass> = order
            .iter()
            .zip(schedule.pass_barriers)
            .map(|(&index, barriers)| {
                let node = resolver.node(index);
                CompiledPass {
                    name: node.name.clone(),
                    registration_index: included[index.index()],
                    dependencies: resolver
                        .execution_dependencies(index)
                        .into_iter()
                        .map(|predecessor| resolver.node(predecessor).name.clone())
                        .collect(),
                    usages: node.usages.clone(),
                    barriers,
                }
            })
            .collect();

        for pass in &passes {
            log::debug!(
                "Scheduled pass '{}' with {} barrier(s)",
                pass.name,
                pass.barriers.len()
            );
        }

        let critical_path = resolver.critical_path(&order);
        let aliasing = plan.stats(&output.resources);
        let bindings = allocation.bindings.clone();

        self.resources.commit(device, allocation);
        let declared: HashSet<u32> = output.resources.keys().copied().collect();
        for handle in self.resources.commit_generator(output.generator, &declared) {
            log::debug!("Released resource handle {handle}");
        }

        Ok(CompiledRenderGraph {
            passes,
            culled,
            resources: output.resources,
            bindings,
            restore_barriers,
            lifetimes,
            aliasing,
            critical_path,
            diagnostics,
        })
    }

    /// Runs the published artifact against `command_buffer`.
    ///
    /// A pass runs when it is enabled and every enabled dependency already ran
    /// this frame. Its barriers are recorded right before it executes.
    pub fn execute(&mut self, command_buffer: &mut D::CommandBuffer) -> Result<()> {
        let compiled = self.compiled.as_ref().ok_or(RenderGraphError::NotCompiled)?;

        let entry_indices: HashMap<String, usize> = self
            .passes
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.pass.name().to_string(), index))
            .collect();
        let enabled: HashSet<String> = self
            .passes
            .iter()
            .filter(|entry| entry.enabled && entry.pass.is_enabled(&self.frame))
            .map(|entry| entry.pass.name().to_string())
            .collect();

        let mut executed: HashSet<&str> = HashSet::new();
        let mut touched: HashSet<u32> = HashSet::new();

        for compiled_pass in compiled.passes() {
            let name = compiled_pass.name.as_str();
            let Some(&index) = entry_indices.get(name) else {
                continue;
            };
            let entry = &mut self.passes[index];

            let can_execute = enabled.contains(name)
                && compiled_pass
                    .dependencies
                    .iter()
                    .all(|dependency| {
                        !enabled.contains(dependency) || executed.contains(dependency.as_str())
                    });
            if !can_execute {
                log::debug!("Skipping pass '{name}'");
                entry.statistics.record_skip();
                continue;
            }

            command_buffer.push_debug_group(name);
            let start = self.config.profiling_enabled.then(Instant::now);

            let result = record_barriers(command_buffer, compiled, &self.resources, compiled_pass)
                .and_then(|()| {
                    let mut context = RenderPassContext::new(
                        name,
                        command_buffer,
                        &self.frame,
                        compiled,
                        &self.resources,
                    );
                    entry.pass.execute(&mut context)
                });

            let elapsed = start.map(|start| start.elapsed());
            command_buffer.pop_debug_group();

            match result {
                Ok(()) => {
                    entry.statistics.record_success(elapsed);
                    executed.insert(name);
                    touched.extend(compiled_pass.usages.iter().map(|usage| usage.handle.id()));
                    self.observers.notify_executed(name, &entry.statistics);
                }
                Err(source) => {
                    let error = RenderGraphError::PassExecutionFailed {
                        pass: name.to_string(),
                        source: Box::new(source),
                    };
                    entry.statistics.record_failure(elapsed, &error);
                    self.observers.notify_error(name, &error);

                    if self.config.resilience == ResilienceMode::Abort {
                        return Err(error);
                    }
                    log::error!("{error}");
                }
            }
        }

        for barrier in compiled.restore_barriers() {
            if !touched.contains(&barrier.handle.id()) {
                continue;
            }
            if let Some(backing) = self.resources.backing(&barrier.binding) {
                command_buffer.resource_barrier(barrier, backing);
            }
        }

        Ok(())
    }

    pub fn frame_data(&self) -> &FrameData {
        &self.frame
    }

    pub fn frame_data_mut(&mut self) -> &mut FrameData {
        &mut self.frame
    }

    /// Provides the backing of an imported or external resource, returning
    /// any previous binding under that name.
    pub fn bind_external(
        &mut self,
        name: &str,
        backing: DeviceResource<D>,
    ) -> Option<DeviceResource<D>> {
        self.resources.bind_external(name, backing)
    }

    pub fn unbind_external(&mut self, name: &str) -> Option<DeviceResource<D>> {
        self.resources.unbind_external(name)
    }

    /// Overrides the size of a transient texture from the next compile on.
    pub fn resize_transient_resource(&mut self, name: &str, width: u32, height: u32) -> Result<()> {
        let resource = self
            .compiled
            .as_ref()
            .and_then(|compiled| compiled.find_resource(name))
            .ok_or_else(|| RenderGraphError::ResourceNotFound {
                resource: name.to_string(),
            })?;

        if resource.scope.is_caller_owned() {
            return Err(RenderGraphError::CannotResizeExternal {
                resource: name.to_string(),
            });
        }
        if resource.handle.kind() == ResourceKind::Buffer {
            return Err(RenderGraphError::CannotResizeBuffer {
                resource: name.to_string(),
            });
        }
        if resource.scope != ResourceScope::Transient {
            return Err(RenderGraphError::CannotResizeNonTransient {
                resource: name.to_string(),
            });
        }

        self.size_overrides
            .insert(name.to_string(), (width, height));
        self.state = GraphState::Uncompiled;
        Ok(())
    }

    pub fn enable_aliasing(&mut self, enabled: bool) {
        if self.config.aliasing_enabled != enabled {
            self.config.aliasing_enabled = enabled;
            self.state = GraphState::Uncompiled;
        }
    }

    pub fn enable_profiling(&mut self, enabled: bool) {
        self.config.profiling_enabled = enabled;
    }

    /// Destroys every graph-owned physical resource and drops the published
    /// artifact. Returns how many resources were destroyed.
    pub fn release_resources(&mut self, device: &mut D) -> usize {
        self.compiled = None;
        self.state = GraphState::Uncompiled;
        self.resources.release_all(device)
    }

    pub fn compiled(&self) -> Option<&CompiledRenderGraph> {
        self.compiled.as_ref()
    }

    pub fn execution_order(&self) -> Vec<&str> {
        self.compiled
            .as_ref()
            .map(CompiledRenderGraph::execution_order)
            .unwrap_or_default()
    }

    pub fn culled_passes(&self) -> &[String] {
        self.compiled
            .as_ref()
            .map(CompiledRenderGraph::culled_passes)
            .unwrap_or_default()
    }

    pub fn statistics(&self, name: &str) -> Option<&PassStatistics> {
        self.entry_index(name)
            .map(|index| &self.passes[index].statistics)
    }

    pub fn all_statistics(&self) -> impl Iterator<Item = &PassStatistics> {
        self.passes.iter().map(|entry| &entry.statistics)
    }

    pub fn critical_path(&self) -> Option<&CriticalPath> {
        self.compiled.as_ref().map(CompiledRenderGraph::critical_path)
    }

    pub fn diagnostics(&self) -> &[ResourceConflict] {
        self.compiled
            .as_ref()
            .map(CompiledRenderGraph::diagnostics)
            .unwrap_or_default()
    }

    pub fn get_pass_mut<T: RenderPass<D> + 'static>(&mut self, name: &str) -> Option<&mut T> {
        let index = self.entry_index(name)?;
        self.passes[index].pass.as_any_mut().downcast_mut::<T>()
    }

    pub fn observers_mut(&mut self) -> &mut PassObservers {
        &mut self.observers
    }
}

impl<D: RenderDevice> Default for RenderGraph<D> {
    fn default() -> Self {
        Self::new()
    }
}

fn record_barriers<D: RenderDevice>(
    command_buffer: &mut D::CommandBuffer,
    compiled: &CompiledRenderGraph,
    resources: &ResourceManager<D>,
    pass: &CompiledPass,
) -> Result<()> {
    for usage in &pass.usages {
        let bound = compiled
            .binding(&usage.handle)
            .and_then(|binding| resources.backing(binding));
        if bound.is_none() {
            return Err(RenderGraphError::ResourceNotBound {
                handle: usage.handle.clone(),
            });
        }
    }

    for barrier in &pass.barriers {
        let backing = resources.backing(&barrier.binding).ok_or_else(|| {
            RenderGraphError::ResourceNotBound {
                handle: barrier.handle.clone(),
            }
        })?;
        command_buffer.resource_barrier(barrier, backing);
    }

    Ok(())
}
