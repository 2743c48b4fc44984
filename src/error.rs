use crate::handle::{ResourceHandle, ResourceKind};
use crate::resource::{AccessType, ResourceConflict, ResourceState};

#[derive(Debug, thiserror::Error)]
pub enum RenderGraphError {
    #[error("Pass '{pass}' depends on itself")]
    SelfDependency { pass: String },

    #[error("Dependency cycle detected: {}", .passes.join(" -> "))]
    CyclicDependency { passes: Vec<String> },

    #[error("Pass '{pass}' is already registered")]
    DuplicatePass { pass: String },

    #[error("Pass '{pass}' depends on unknown pass '{dependency}'")]
    UnknownDependency { pass: String, dependency: String },

    #[error("Pass '{pass}' not found")]
    PassNotFound { pass: String },

    #[error(
        "Passes '{first}' and '{second}' write {resource} with incompatible states {first_state:?} and {second_state:?}"
    )]
    IncompatibleWriters {
        resource: ResourceHandle,
        first: String,
        second: String,
        first_state: ResourceState,
        second_state: ResourceState,
    },

    #[error("{} resource conflict(s) rejected by strict validation: {}", .conflicts.len(), summarize(.conflicts))]
    StrictValidation { conflicts: Vec<ResourceConflict> },

    #[error("'{operation}' called outside of a pass setup")]
    NotRecording { operation: String },

    #[error("Builder is already recording pass '{pass}'")]
    AlreadyRecording { pass: String },

    #[error("Invalid resource handle {handle}")]
    InvalidHandle { handle: ResourceHandle },

    #[error("Stale resource handle {handle}: current generation is {current}")]
    StaleHandle { handle: ResourceHandle, current: u32 },

    #[error("Resource name must not be empty (pass '{pass}')")]
    EmptyResourceName { pass: String },

    #[error("Resource '{resource}' is already declared by pass '{owner}'")]
    DuplicateResource { resource: String, owner: String },

    #[error("Type mismatch: {operation} called on {actual} resource '{resource}'")]
    TypeMismatch {
        operation: String,
        actual: ResourceKind,
        resource: String,
    },

    #[error("State {state:?} cannot be used for {access:?} access of {kind} resource '{resource}'")]
    InvalidState {
        resource: String,
        kind: ResourceKind,
        access: AccessType,
        state: ResourceState,
    },

    #[error("Resource {handle} not bound")]
    ResourceNotBound { handle: ResourceHandle },

    #[error("Resource '{resource}' not found")]
    ResourceNotFound { resource: String },

    #[error("Cannot resize external resource '{resource}'")]
    CannotResizeExternal { resource: String },

    #[error("Cannot resize buffer '{resource}' with width/height")]
    CannotResizeBuffer { resource: String },

    #[error("Cannot resize non-transient resource '{resource}'")]
    CannotResizeNonTransient { resource: String },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Pass '{pass}' failed during setup: {source}")]
    PassSetupFailed {
        pass: String,
        #[source]
        source: Box<RenderGraphError>,
    },

    #[error("Pass '{pass}' failed during execute: {source}")]
    PassExecutionFailed {
        pass: String,
        #[source]
        source: Box<RenderGraphError>,
    },

    #[error("Render graph has not been compiled")]
    NotCompiled,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Usage,
    ResourceConflict,
    Runtime,
    Device,
}

impl RenderGraphError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RenderGraphError::SelfDependency { .. }
            | RenderGraphError::CyclicDependency { .. }
            | RenderGraphError::DuplicatePass { .. }
            | RenderGraphError::UnknownDependency { .. }
            | RenderGraphError::PassNotFound { .. }
            | RenderGraphError::CannotResizeExternal { .. }
            | RenderGraphError::CannotResizeBuffer { .. }
            | RenderGraphError::CannotResizeNonTransient { .. }
            | RenderGraphError::ResourceNotFound { .. } => ErrorCategory::Configuration,
            RenderGraphError::NotRecording { .. }
            | RenderGraphError::AlreadyRecording { .. }
            | RenderGraphError::InvalidHandle { .. }
            | RenderGraphError::StaleHandle { .. }
            | RenderGraphError::EmptyResourceName { .. }
            | RenderGraphError::DuplicateResource { .. }
            | RenderGraphError::TypeMismatch { .. }
            | RenderGraphError::InvalidState { .. } => ErrorCategory::Usage,
            RenderGraphError::IncompatibleWriters { .. }
            | RenderGraphError::StrictValidation { .. } => ErrorCategory::ResourceConflict,
            RenderGraphError::Device(_) => ErrorCategory::Device,
            RenderGraphError::ResourceNotBound { .. }
            | RenderGraphError::PassSetupFailed { .. }
            | RenderGraphError::PassExecutionFailed { .. }
            | RenderGraphError::NotCompiled
            | RenderGraphError::Other(_) => ErrorCategory::Runtime,
        }
    }
}

impl From<&str> for RenderGraphError {
    fn from(s: &str) -> Self {
        RenderGraphError::Other(s.to_string())
    }
}

impl From<String> for RenderGraphError {
    fn from(s: String) -> Self {
        RenderGraphError::Other(s)
    }
}

fn summarize(conflicts: &[ResourceConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, RenderGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_error_taxonomy() {
        let cycle = RenderGraphError::CyclicDependency {
            passes: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(cycle.category(), ErrorCategory::Configuration);
        assert_eq!(cycle.to_string(), "Dependency cycle detected: a -> b");

        let usage = RenderGraphError::NotRecording {
            operation: "create_texture".to_string(),
        };
        assert_eq!(usage.category(), ErrorCategory::Usage);

        let failed = RenderGraphError::PassExecutionFailed {
            pass: "blit".to_string(),
            source: Box::new("boom".into()),
        };
        assert_eq!(failed.category(), ErrorCategory::Runtime);
        assert_eq!(failed.to_string(), "Pass 'blit' failed during execute: boom");
    }
}
