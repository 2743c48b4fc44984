use crate::compiled::{Barrier, BarrierKind};
use crate::device::{BackingResource, CommandBuffer, RenderDevice};
use crate::error::{RenderGraphError, Result};
use crate::resource::{RenderGraphBufferDescriptor, RenderGraphTextureDescriptor};
use std::sync::Arc;

/// [`RenderDevice`] over a `wgpu::Device`.
pub struct WgpuDevice {
    device: wgpu::Device,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }
}

/// wgpu tracks resource states itself, so barriers are only recorded as
/// debug markers for capture tools.
pub struct WgpuCommandBuffer {
    encoder: wgpu::CommandEncoder,
    barrier_count: usize,
}

impl WgpuCommandBuffer {
    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        &mut self.encoder
    }

    pub fn barrier_count(&self) -> usize {
        self.barrier_count
    }

    pub fn finish(self) -> wgpu::CommandBuffer {
        self.encoder.finish()
    }
}

fn barrier_label(barrier: &Barrier) -> String {
    match barrier.kind {
        BarrierKind::Transition => format!(
            "{}: {:?} -> {:?}",
            barrier.handle.name(),
            barrier.before,
            barrier.after
        ),
        BarrierKind::UnorderedAccess => format!("{}: uav", barrier.handle.name()),
    }
}

impl CommandBuffer for WgpuCommandBuffer {
    type Texture = Arc<wgpu::Texture>;
    type Buffer = Arc<wgpu::Buffer>;

    fn resource_barrier(
        &mut self,
        barrier: &Barrier,
        _resource: &BackingResource<Self::Texture, Self::Buffer>,
    ) {
        self.barrier_count += 1;
        self.encoder.insert_debug_marker(&barrier_label(barrier));
    }

    fn push_debug_group(&mut self, label: &str) {
        self.encoder.push_debug_group(label);
    }

    fn pop_debug_group(&mut self) {
        self.encoder.pop_debug_group();
    }
}

impl RenderDevice for WgpuDevice {
    type Texture = Arc<wgpu::Texture>;
    type Buffer = Arc<wgpu::Buffer>;
    type CommandBuffer = WgpuCommandBuffer;

    fn create_texture(
        &mut self,
        label: &str,
        descriptor: &RenderGraphTextureDescriptor,
    ) -> Result<Self::Texture> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(RenderGraphError::Device(format!(
                "texture '{label}' has zero extent {}x{}",
                descriptor.width, descriptor.height
            )));
        }

        let texture = self
            .device
            .create_texture(&descriptor.to_wgpu_descriptor(Some(label)));
        Ok(Arc::new(texture))
    }

    fn create_buffer(
        &mut self,
        label: &str,
        descriptor: &RenderGraphBufferDescriptor,
    ) -> Result<Self::Buffer> {
        let buffer = self
            .device
            .create_buffer(&descriptor.to_wgpu_descriptor(Some(label)));
        Ok(Arc::new(buffer))
    }

    fn destroy_texture(&mut self, texture: Self::Texture) {
        texture.destroy();
    }

    fn destroy_buffer(&mut self, buffer: Self::Buffer) {
        buffer.destroy();
    }

    fn create_command_buffer(&mut self, label: &str) -> Result<Self::CommandBuffer> {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Ok(WgpuCommandBuffer {
            encoder,
            barrier_count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiled::ResourceBinding;
    use crate::device::PhysicalResourceId;
    use crate::handle::{ResourceHandle, ResourceKind};
    use crate::resource::ResourceState;

    #[test]
    fn barrier_markers_name_the_transition() {
        let mut barrier = Barrier {
            handle: ResourceHandle::new(3, ResourceKind::Texture, 1, "hdr"),
            binding: ResourceBinding::Physical(PhysicalResourceId::new(1)),
            before: ResourceState::RenderTarget,
            after: ResourceState::ShaderResource,
            kind: BarrierKind::Transition,
        };
        assert_eq!(barrier_label(&barrier), "hdr: RenderTarget -> ShaderResource");

        barrier.kind = BarrierKind::UnorderedAccess;
        assert_eq!(barrier_label(&barrier), "hdr: uav");
    }
}
