use crate::builder::RenderGraphBuilder;
use crate::compiled::CompiledRenderGraph;
use crate::device::{DeviceResource, RenderDevice};
use crate::error::{RenderGraphError, Result};
use crate::handle::{ResourceHandle, ResourceKind};
use crate::resource::RenderGraphTextureDescriptor;
use crate::resource_manager::ResourceManager;
use nalgebra_glm::{Mat4, Vec3};
use std::any::Any;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PassCategory {
    #[default]
    Graphics,
    Compute,
    Transfer,
    Present,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassStatistics {
    pub pass_name: String,
    pub execution_count: u64,
    pub skip_count: u64,
    pub failure_count: u64,
    pub last_execution_time: Option<Duration>,
    pub total_execution_time: Duration,
    pub last_error: Option<String>,
    /// Whether the pass ran in the most recent frame.
    pub enabled: bool,
}

impl PassStatistics {
    pub fn new(pass_name: impl Into<String>) -> Self {
        Self {
            pass_name: pass_name.into(),
            ..Self::default()
        }
    }

    pub fn record_success(&mut self, execution_time: Option<Duration>) {
        self.execution_count += 1;
        self.enabled = true;
        self.record_time(execution_time);
    }

    pub fn record_failure(&mut self, execution_time: Option<Duration>, error: &RenderGraphError) {
        self.failure_count += 1;
        self.enabled = false;
        self.last_error = Some(error.to_string());
        self.record_time(execution_time);
    }

    pub fn record_skip(&mut self) {
        self.skip_count += 1;
        self.enabled = false;
    }

    pub fn average_execution_time(&self) -> Option<Duration> {
        let measured = self.execution_count + self.failure_count;
        if measured == 0 || self.last_execution_time.is_none() {
            return None;
        }
        u32::try_from(measured)
            .ok()
            .map(|count| self.total_execution_time / count)
    }

    fn record_time(&mut self, execution_time: Option<Duration>) {
        if let Some(elapsed) = execution_time {
            self.last_execution_time = Some(elapsed);
            self.total_execution_time += elapsed;
        }
    }
}

/// Per-frame globals written by the caller before `execute`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameData {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    pub viewport: (u32, u32),
    pub delta_time: f32,
    pub elapsed_time: f32,
    pub frame_index: u64,
}

impl Default for FrameData {
    fn default() -> Self {
        Self {
            view: Mat4::identity(),
            projection: Mat4::identity(),
            camera_position: Vec3::zeros(),
            viewport: (1, 1),
            delta_time: 0.0,
            elapsed_time: 0.0,
            frame_index: 0,
        }
    }
}

impl FrameData {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.viewport.0 as f32 / self.viewport.1.max(1) as f32
    }

    pub fn set_camera(&mut self, position: Vec3, target: Vec3, fov_degrees: f32) {
        self.camera_position = position;
        self.view = nalgebra_glm::look_at_lh(&position, &target, &Vec3::y());
        self.projection = nalgebra_glm::perspective_lh_zo(
            self.aspect_ratio(),
            fov_degrees.to_radians(),
            0.1,
            1000.0,
        );
    }

    pub fn advance(&mut self, delta_time: f32) {
        self.frame_index += 1;
        self.delta_time = delta_time;
        self.elapsed_time += delta_time;
    }
}

/// Everything a pass sees while executing.
pub struct RenderPassContext<'a, D: RenderDevice> {
    pub command_buffer: &'a mut D::CommandBuffer,
    pub frame: &'a FrameData,
    pass_name: &'a str,
    compiled: &'a CompiledRenderGraph,
    resources: &'a ResourceManager<D>,
}

impl<'a, D: RenderDevice> RenderPassContext<'a, D> {
    pub(crate) fn new(
        pass_name: &'a str,
        command_buffer: &'a mut D::CommandBuffer,
        frame: &'a FrameData,
        compiled: &'a CompiledRenderGraph,
        resources: &'a ResourceManager<D>,
    ) -> Self {
        Self {
            command_buffer,
            frame,
            pass_name,
            compiled,
            resources,
        }
    }

    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    pub fn resource(&self, handle: &ResourceHandle) -> Result<&'a DeviceResource<D>> {
        let resources = self.resources;
        self.compiled
            .binding(handle)
            .and_then(|binding| resources.backing(binding))
            .ok_or_else(|| RenderGraphError::ResourceNotBound {
                handle: handle.clone(),
            })
    }

    pub fn texture(&self, handle: &ResourceHandle) -> Result<&'a D::Texture> {
        self.resource(handle)?
            .as_texture()
            .ok_or_else(|| RenderGraphError::TypeMismatch {
                operation: "texture".to_string(),
                actual: ResourceKind::Buffer,
                resource: handle.name().to_string(),
            })
    }

    pub fn buffer(&self, handle: &ResourceHandle) -> Result<&'a D::Buffer> {
        self.resource(handle)?
            .as_buffer()
            .ok_or_else(|| RenderGraphError::TypeMismatch {
                operation: "buffer".to_string(),
                actual: ResourceKind::Texture,
                resource: handle.name().to_string(),
            })
    }

    pub fn texture_descriptor(&self, handle: &ResourceHandle) -> Result<&'a RenderGraphTextureDescriptor> {
        let resource = self
            .compiled
            .resource(handle)
            .ok_or_else(|| RenderGraphError::InvalidHandle {
                handle: handle.clone(),
            })?;
        resource
            .description
            .as_texture()
            .ok_or_else(|| RenderGraphError::TypeMismatch {
                operation: "texture_descriptor".to_string(),
                actual: handle.kind(),
                resource: handle.name().to_string(),
            })
    }

    pub fn texture_size(&self, handle: &ResourceHandle) -> Result<(u32, u32)> {
        self.texture_descriptor(handle)
            .map(|descriptor| (descriptor.width, descriptor.height))
    }
}

/// A unit of GPU work. `setup` runs once per compile, `execute` once per
/// frame in compiled order.
pub trait RenderPass<D: RenderDevice>: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> PassCategory {
        PassCategory::Graphics
    }

    /// Higher runs earlier among passes with no ordering constraint.
    fn priority(&self) -> i32 {
        0
    }

    fn always_execute(&self) -> bool {
        false
    }

    fn is_enabled(&self, _frame: &FrameData) -> bool {
        true
    }

    fn setup(&mut self, builder: &mut RenderGraphBuilder) -> Result<()>;

    fn execute(&mut self, context: &mut RenderPassContext<'_, D>) -> Result<()>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_track_outcomes() {
        let mut statistics = PassStatistics::new("shadow");
        statistics.record_success(Some(Duration::from_millis(2)));
        statistics.record_success(Some(Duration::from_millis(4)));
        statistics.record_skip();
        statistics.record_failure(None, &"device lost".into());

        assert_eq!(statistics.execution_count, 2);
        assert_eq!(statistics.skip_count, 1);
        assert_eq!(statistics.failure_count, 1);
        assert_eq!(statistics.last_error.as_deref(), Some("device lost"));
        assert_eq!(statistics.last_execution_time, Some(Duration::from_millis(4)));
        assert_eq!(statistics.average_execution_time(), Some(Duration::from_millis(2)));
        assert!(!statistics.enabled);
    }

    #[test]
    fn unprofiled_statistics_have_no_timing() {
        let mut statistics = PassStatistics::new("ui");
        statistics.record_success(None);
        assert_eq!(statistics.execution_count, 1);
        assert!(statistics.enabled);
        assert_eq!(statistics.average_execution_time(), None);
    }

    #[test]
    fn frame_data_camera() {
        let mut frame = FrameData {
            viewport: (1920, 1080),
            ..FrameData::default()
        };
        assert_eq!(frame.view_projection(), Mat4::identity());

        frame.set_camera(nalgebra_glm::vec3(0.0, 2.0, 5.0), Vec3::zeros(), 60.0);
        assert_ne!(frame.view, Mat4::identity());
        assert!((frame.aspect_ratio() - 16.0 / 9.0).abs() < 1e-6);

        frame.advance(0.016);
        frame.advance(0.016);
        assert_eq!(frame.frame_index, 2);
        assert!((frame.elapsed_time - 0.032).abs() < 1e-6);
    }
}
