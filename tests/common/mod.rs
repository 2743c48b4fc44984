#![allow(dead_code)]

use frame_graph::{
    BackingResource, Barrier, BarrierKind, CommandBuffer, RenderDevice, RenderGraphBufferDescriptor,
    RenderGraphBuilder, RenderGraphError, RenderGraphTextureDescriptor, RenderPass,
    RenderPassContext, ResourceHandle, ResourceState, Result,
};
use std::any::Any;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn color(width: u32, height: u32) -> RenderGraphTextureDescriptor {
    RenderGraphTextureDescriptor::color(width, height)
}

// ============================================================================
// Mock backend
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTexture {
    pub id: u32,
    pub label: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBuffer {
    pub id: u32,
    pub label: String,
    pub size: u64,
}

#[derive(Default)]
pub struct MockDevice {
    next_id: u32,
    pub created: Vec<String>,
    pub destroyed: Vec<u32>,
    pub fail_creation: bool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_resources(&self) -> usize {
        self.created.len() - self.destroyed.len()
    }

    pub fn external_texture(&mut self, label: &str) -> BackingResource<MockTexture, MockBuffer> {
        self.next_id += 1;
        BackingResource::Texture(MockTexture {
            id: 1000 + self.next_id,
            label: label.to_string(),
            width: 1280,
            height: 720,
        })
    }
}

impl RenderDevice for MockDevice {
    type Texture = MockTexture;
    type Buffer = MockBuffer;
    type CommandBuffer = MockCommandBuffer;

    fn create_texture(
        &mut self,
        label: &str,
        descriptor: &RenderGraphTextureDescriptor,
    ) -> Result<MockTexture> {
        if self.fail_creation {
            return Err(RenderGraphError::Device(format!("cannot create '{label}'")));
        }
        self.next_id += 1;
        self.created.push(label.to_string());
        Ok(MockTexture {
            id: self.next_id,
            label: label.to_string(),
            width: descriptor.width,
            height: descriptor.height,
        })
    }

    fn create_buffer(
        &mut self,
        label: &str,
        descriptor: &RenderGraphBufferDescriptor,
    ) -> Result<MockBuffer> {
        if self.fail_creation {
            return Err(RenderGraphError::Device(format!("cannot create '{label}'")));
        }
        self.next_id += 1;
        self.created.push(label.to_string());
        Ok(MockBuffer {
            id: self.next_id,
            label: label.to_string(),
            size: descriptor.size,
        })
    }

    fn destroy_texture(&mut self, texture: MockTexture) {
        self.destroyed.push(texture.id);
    }

    fn destroy_buffer(&mut self, buffer: MockBuffer) {
        self.destroyed.push(buffer.id);
    }

    fn create_command_buffer(&mut self, _label: &str) -> Result<MockCommandBuffer> {
        Ok(MockCommandBuffer::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier {
        resource: String,
        before: ResourceState,
        after: ResourceState,
        kind: BarrierKind,
        backing: u32,
    },
    PushGroup(String),
    PopGroup,
    Draw(String),
}

#[derive(Debug, Default)]
pub struct MockCommandBuffer {
    pub commands: Vec<Command>,
}

impl MockCommandBuffer {
    pub fn draws(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Draw(pass) => Some(pass.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn barriers_for(&self, resource: &str) -> Vec<(ResourceState, ResourceState)> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Barrier {
                    resource: name,
                    before,
                    after,
                    ..
                } if name == resource => Some((*before, *after)),
                _ => None,
            })
            .collect()
    }
}

impl CommandBuffer for MockCommandBuffer {
    type Texture = MockTexture;
    type Buffer = MockBuffer;

    fn resource_barrier(&mut self, barrier: &Barrier, resource: &BackingResource<MockTexture, MockBuffer>) {
        let backing = match resource {
            BackingResource::Texture(texture) => texture.id,
            BackingResource::Buffer(buffer) => buffer.id,
        };
        self.commands.push(Command::Barrier {
            resource: barrier.handle.name().to_string(),
            before: barrier.before,
            after: barrier.after,
            kind: barrier.kind,
            backing,
        });
    }

    fn push_debug_group(&mut self, label: &str) {
        self.commands.push(Command::PushGroup(label.to_string()));
    }

    fn pop_debug_group(&mut self) {
        self.commands.push(Command::PopGroup);
    }
}

// ============================================================================
// Test pass
// ============================================================================

pub type SetupFn =
    Box<dyn FnMut(&mut RenderGraphBuilder) -> Result<Vec<ResourceHandle>> + Send + Sync>;

/// Pass driven by a setup closure. Execute resolves every handle the setup
/// returned and records a draw.
pub struct TestPass {
    name: String,
    priority: i32,
    always_execute: bool,
    fail_execute: bool,
    setup: SetupFn,
    pub handles: Vec<ResourceHandle>,
    pub executions: u32,
}

impl TestPass {
    pub fn new(
        name: &str,
        setup: impl FnMut(&mut RenderGraphBuilder) -> Result<Vec<ResourceHandle>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            priority: 0,
            always_execute: false,
            fail_execute: false,
            setup: Box::new(setup),
            handles: Vec::new(),
            executions: 0,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn always_execute(mut self) -> Self {
        self.always_execute = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub fn boxed(self) -> Box<dyn RenderPass<MockDevice>> {
        Box::new(self)
    }
}

impl RenderPass<MockDevice> for TestPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn always_execute(&self) -> bool {
        self.always_execute
    }

    fn setup(&mut self, builder: &mut RenderGraphBuilder) -> Result<()> {
        self.handles = (self.setup)(builder)?;
        Ok(())
    }

    fn execute(&mut self, context: &mut RenderPassContext<'_, MockDevice>) -> Result<()> {
        if self.fail_execute {
            return Err(format!("{} exploded", self.name).into());
        }
        for handle in &self.handles {
            context.resource(handle)?;
        }
        context
            .command_buffer
            .commands
            .push(Command::Draw(self.name.clone()));
        self.executions += 1;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Common pass shapes
// ============================================================================

/// Creates `output` and renders into it.
pub fn producer(name: &str, output: &'static str) -> TestPass {
    TestPass::new(name, move |builder| {
        let target = builder.create_texture(output, color(1280, 720))?;
        builder.write_texture(&target)?;
        Ok(vec![target])
    })
}

/// Reads `input` and renders into a new `output`.
pub fn filter(name: &str, input: &'static str, output: &'static str) -> TestPass {
    TestPass::new(name, move |builder| {
        let source = find(builder, input)?;
        builder.read_texture(&source)?;
        let target = builder.create_texture(output, color(1280, 720))?;
        builder.write_texture(&target)?;
        Ok(vec![source, target])
    })
}

/// Reads `input` and writes the external back buffer.
pub fn present(name: &str, input: &'static str) -> TestPass {
    TestPass::new(name, move |builder| {
        let source = find(builder, input)?;
        builder.read_texture(&source)?;
        let back_buffer =
            builder.external_texture("back_buffer", color(1280, 720), ResourceState::Present)?;
        builder.write_texture(&back_buffer)?;
        Ok(vec![source, back_buffer])
    })
}

pub fn find(builder: &RenderGraphBuilder, name: &str) -> Result<ResourceHandle> {
    builder
        .find_resource(name)
        .ok_or_else(|| RenderGraphError::ResourceNotFound {
            resource: name.to_string(),
        })
}
