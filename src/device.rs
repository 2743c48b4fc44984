use crate::compiled::Barrier;
use crate::error::Result;
use crate::resource::{RenderGraphBufferDescriptor, RenderGraphTextureDescriptor, ResourceDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalResourceId(pub u32);

impl PhysicalResourceId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackingResource<T, B> {
    Texture(T),
    Buffer(B),
}

impl<T, B> BackingResource<T, B> {
    pub fn as_texture(&self) -> Option<&T> {
        match self {
            BackingResource::Texture(texture) => Some(texture),
            BackingResource::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&B> {
        match self {
            BackingResource::Buffer(buffer) => Some(buffer),
            BackingResource::Texture(_) => None,
        }
    }
}

pub type DeviceResource<D> =
    BackingResource<<D as RenderDevice>::Texture, <D as RenderDevice>::Buffer>;

/// Recording surface handed to passes. The graph only ever records barriers
/// and debug groups into it.
pub trait CommandBuffer {
    type Texture;
    type Buffer;

    fn resource_barrier(
        &mut self,
        barrier: &Barrier,
        resource: &BackingResource<Self::Texture, Self::Buffer>,
    );

    fn push_debug_group(&mut self, _label: &str) {}

    fn pop_debug_group(&mut self) {}
}

/// Resource creation surface of a graphics backend.
pub trait RenderDevice {
    type Texture;
    type Buffer;
    type CommandBuffer: CommandBuffer<Texture = Self::Texture, Buffer = Self::Buffer>;

    fn create_texture(
        &mut self,
        label: &str,
        descriptor: &RenderGraphTextureDescriptor,
    ) -> Result<Self::Texture>;

    fn create_buffer(
        &mut self,
        label: &str,
        descriptor: &RenderGraphBufferDescriptor,
    ) -> Result<Self::Buffer>;

    fn destroy_texture(&mut self, _texture: Self::Texture) {}

    fn destroy_buffer(&mut self, _buffer: Self::Buffer) {}

    fn create_command_buffer(&mut self, label: &str) -> Result<Self::CommandBuffer>;

    fn create_resource(
        &mut self,
        label: &str,
        description: &ResourceDescription,
    ) -> Result<BackingResource<Self::Texture, Self::Buffer>> {
        match description {
            ResourceDescription::Texture(descriptor) => self
                .create_texture(label, descriptor)
                .map(BackingResource::Texture),
            ResourceDescription::Buffer(descriptor) => self
                .create_buffer(label, descriptor)
                .map(BackingResource::Buffer),
        }
    }

    fn destroy_resource(&mut self, resource: BackingResource<Self::Texture, Self::Buffer>) {
        match resource {
            BackingResource::Texture(texture) => self.destroy_texture(texture),
            BackingResource::Buffer(buffer) => self.destroy_buffer(buffer),
        }
    }
}
