//! Render graph compiler and scheduler.
//!
//! Passes declare the resources they create, read and write during `setup`.
//! [`RenderGraph::compile`] turns those declarations into an ordered,
//! culled schedule with aliased transient storage and precomputed barriers;
//! [`RenderGraph::execute`] replays that schedule every frame.

pub mod builder;
pub mod compiled;
pub mod config;
pub mod device;
pub mod error;
pub mod graph;
pub mod handle;
pub mod observer;
pub mod pass;
pub mod resolver;
pub mod resource;
pub mod resource_manager;
pub mod wgpu_backend;

pub use builder::{BuilderState, PassResources, RenderGraphBuilder};
pub use compiled::{Barrier, BarrierKind, CompiledPass, CompiledRenderGraph, ResourceBinding};
pub use config::{RenderGraphConfig, ResilienceMode, ValidationMode};
pub use device::{BackingResource, CommandBuffer, DeviceResource, PhysicalResourceId, RenderDevice};
pub use error::{ErrorCategory, RenderGraphError, Result};
pub use graph::{GraphState, RenderGraph};
pub use handle::{ResourceHandle, ResourceHandleGenerator, ResourceKind};
pub use observer::PassObservers;
pub use pass::{FrameData, PassCategory, PassStatistics, RenderPass, RenderPassContext};
pub use resolver::{CriticalPath, DependencyResolver, GraphNode};
pub use resource::{
    AccessType, ConflictKind, RenderGraphBufferDescriptor, RenderGraphTextureDescriptor,
    ResourceConflict, ResourceDescription, ResourceScope, ResourceState, ResourceUsageInfo,
    VirtualResource,
};
pub use resource_manager::{AliasingStats, ResourceLifetime, ResourceManager};
pub use wgpu_backend::{WgpuCommandBuffer, WgpuDevice};
