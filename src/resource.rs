use crate::handle::{ResourceHandle, ResourceKind};
use std::fmt;
use wgpu::{
    BufferDescriptor, BufferUsages, Extent3d, TextureDescriptor, TextureDimension, TextureFormat,
    TextureUsages,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderGraphTextureDescriptor {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub usage: TextureUsages,
    pub sample_count: u32,
    pub mip_level_count: u32,
    pub dimension: TextureDimension,
    pub depth_or_array_layers: u32,
}

impl RenderGraphTextureDescriptor {
    pub fn color(width: u32, height: u32) -> Self {
        Self {
            format: TextureFormat::Rgba8UnormSrgb,
            width,
            height,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            sample_count: 1,
            mip_level_count: 1,
            dimension: TextureDimension::D2,
            depth_or_array_layers: 1,
        }
    }

    pub fn depth(width: u32, height: u32) -> Self {
        Self {
            format: TextureFormat::Depth32Float,
            ..Self::color(width, height)
        }
    }

    pub fn storage(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            format,
            usage: TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING,
            ..Self::color(width, height)
        }
    }

    pub fn format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn usage(mut self, usage: TextureUsages) -> Self {
        self.usage = usage;
        self
    }

    pub fn sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    pub fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_level_count = levels;
        self
    }

    pub fn cube_map(mut self) -> Self {
        self.dimension = TextureDimension::D2;
        self.depth_or_array_layers = 6;
        self
    }

    pub fn array_layers(mut self, layers: u32) -> Self {
        self.depth_or_array_layers = layers;
        self
    }

    pub fn dimension_3d(mut self, depth: u32) -> Self {
        self.dimension = TextureDimension::D3;
        self.depth_or_array_layers = depth;
        self
    }

    pub fn is_depth(&self) -> bool {
        self.format.is_depth_stencil_format()
    }

    pub fn to_wgpu_descriptor<'a>(&self, label: Option<&'a str>) -> TextureDescriptor<'a> {
        TextureDescriptor {
            label,
            size: Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: self.depth_or_array_layers,
            },
            mip_level_count: self.mip_level_count,
            sample_count: self.sample_count,
            dimension: self.dimension,
            format: self.format,
            usage: self.usage,
            view_formats: &[],
        }
    }

    /// Usage flags are not compared; an aliased slot carries the union.
    pub fn can_alias(&self, other: &Self) -> bool {
        self.format == other.format
            && self.width == other.width
            && self.height == other.height
            && self.sample_count == other.sample_count
            && self.mip_level_count == other.mip_level_count
            && self.dimension == other.dimension
            && self.depth_or_array_layers == other.depth_or_array_layers
    }

    pub fn estimated_size(&self) -> u64 {
        let bytes_per_block = self.format.block_copy_size(None).unwrap_or(4) as u64;
        let (block_width, block_height) = self.format.block_dimensions();
        let layers = self.depth_or_array_layers as u64;
        let samples = self.sample_count.max(1) as u64;

        let mut total_size = 0u64;
        let mut width = self.width.max(1);
        let mut height = self.height.max(1);

        for _ in 0..self.mip_level_count.max(1) {
            let blocks_wide = width.div_ceil(block_width) as u64;
            let blocks_high = height.div_ceil(block_height) as u64;
            total_size += blocks_wide * blocks_high * bytes_per_block * layers * samples;
            width = (width / 2).max(1);
            height = (height / 2).max(1);
        }

        total_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderGraphBufferDescriptor {
    pub size: u64,
    pub usage: BufferUsages,
    pub mapped_at_creation: bool,
}

impl RenderGraphBufferDescriptor {
    pub fn new(size: u64, usage: BufferUsages) -> Self {
        Self {
            size,
            usage,
            mapped_at_creation: false,
        }
    }

    pub fn storage(size: u64) -> Self {
        Self::new(size, BufferUsages::STORAGE | BufferUsages::COPY_DST)
    }

    pub fn to_wgpu_descriptor<'a>(&self, label: Option<&'a str>) -> BufferDescriptor<'a> {
        BufferDescriptor {
            label,
            size: self.size,
            usage: self.usage,
            mapped_at_creation: self.mapped_at_creation,
        }
    }

    /// Sizes may differ; an aliased slot grows to the largest occupant.
    pub fn can_alias(&self, other: &Self) -> bool {
        self.usage == other.usage && !self.mapped_at_creation && !other.mapped_at_creation
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDescription {
    Texture(RenderGraphTextureDescriptor),
    Buffer(RenderGraphBufferDescriptor),
}

impl ResourceDescription {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDescription::Texture(_) => ResourceKind::Texture,
            ResourceDescription::Buffer(_) => ResourceKind::Buffer,
        }
    }

    pub fn as_texture(&self) -> Option<&RenderGraphTextureDescriptor> {
        match self {
            ResourceDescription::Texture(descriptor) => Some(descriptor),
            ResourceDescription::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&RenderGraphBufferDescriptor> {
        match self {
            ResourceDescription::Buffer(descriptor) => Some(descriptor),
            ResourceDescription::Texture(_) => None,
        }
    }

    pub fn can_alias(&self, other: &Self) -> bool {
        match (self, other) {
            (ResourceDescription::Texture(a), ResourceDescription::Texture(b)) => a.can_alias(b),
            (ResourceDescription::Buffer(a), ResourceDescription::Buffer(b)) => a.can_alias(b),
            _ => false,
        }
    }

    /// Widens this description so it can also back `other`.
    pub fn absorb(&mut self, other: &Self) {
        match (self, other) {
            (ResourceDescription::Texture(pool), ResourceDescription::Texture(resource)) => {
                pool.usage |= resource.usage;
            }
            (ResourceDescription::Buffer(pool), ResourceDescription::Buffer(resource)) => {
                pool.size = pool.size.max(resource.size);
                pool.usage |= resource.usage;
            }
            _ => {}
        }
    }

    pub fn estimated_size(&self) -> u64 {
        match self {
            ResourceDescription::Texture(descriptor) => descriptor.estimated_size(),
            ResourceDescription::Buffer(descriptor) => descriptor.size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceScope {
    /// Lives for part of a frame; eligible for aliasing.
    Transient,
    /// Graph-owned, dedicated storage kept across recompiles.
    Persistent,
    /// Caller-owned backing bound by name.
    Imported,
    /// Caller-owned backing that is always a required graph output.
    External,
}

impl ResourceScope {
    pub fn is_aliasable(self) -> bool {
        self == ResourceScope::Transient
    }

    pub fn is_caller_owned(self) -> bool {
        matches!(self, ResourceScope::Imported | ResourceScope::External)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Read,
    Write,
    ReadWrite,
}

impl AccessType {
    pub fn reads(self) -> bool {
        matches!(self, AccessType::Read | AccessType::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, AccessType::Write | AccessType::ReadWrite)
    }

    pub fn merge(self, other: AccessType) -> AccessType {
        if self == other {
            self
        } else {
            AccessType::ReadWrite
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    Common,
    ShaderResource,
    RenderTarget,
    UnorderedAccess,
    DepthRead,
    DepthWrite,
    CopySource,
    CopyDestination,
    Present,
}

impl ResourceState {
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ResourceState::RenderTarget
                | ResourceState::UnorderedAccess
                | ResourceState::DepthWrite
                | ResourceState::CopyDestination
        )
    }

    pub fn is_valid_for(self, kind: ResourceKind) -> bool {
        match self {
            ResourceState::RenderTarget
            | ResourceState::DepthRead
            | ResourceState::DepthWrite
            | ResourceState::Present => kind == ResourceKind::Texture,
            _ => true,
        }
    }

    pub fn supports(self, access: AccessType) -> bool {
        match access {
            AccessType::Read => !self.is_write() && self != ResourceState::Undefined,
            AccessType::Write | AccessType::ReadWrite => self.is_write(),
        }
    }

    fn attachment_class(self) -> Option<u8> {
        match self {
            ResourceState::RenderTarget => Some(0),
            ResourceState::DepthRead | ResourceState::DepthWrite => Some(1),
            _ => None,
        }
    }

    /// Color and depth attachment states can never target the same image.
    pub fn is_compatible_with(self, other: ResourceState) -> bool {
        match (self.attachment_class(), other.attachment_class()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUsageInfo {
    pub handle: ResourceHandle,
    pub access_type: AccessType,
    pub required_state: ResourceState,
    pub pass_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualResource {
    pub handle: ResourceHandle,
    pub description: ResourceDescription,
    pub scope: ResourceScope,
    pub initial_state: ResourceState,
    pub creator: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// One pass declared the same resource with two different states.
    IncompatibleStates,
    /// Several passes write the resource without an explicit dependency.
    MultipleWriters,
    /// A transient resource is read but no pass ever writes it.
    ReadWithoutWriter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceConflict {
    pub kind: ConflictKind,
    pub resource: ResourceHandle,
    pub passes: Vec<String>,
    pub states: Vec<ResourceState>,
}

impl fmt::Display for ResourceConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConflictKind::IncompatibleStates => write!(
                f,
                "{} used with conflicting states {:?} in pass '{}'",
                self.resource,
                self.states,
                self.passes.join("', '")
            ),
            ConflictKind::MultipleWriters => write!(
                f,
                "{} written by '{}' without explicit ordering",
                self.resource,
                self.passes.join("', '")
            ),
            ConflictKind::ReadWithoutWriter => write!(
                f,
                "{} read by '{}' but never written",
                self.resource,
                self.passes.join("', '")
            ),
        }
    }
}
