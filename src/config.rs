/// What happens when a pass fails during setup or execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResilienceMode {
    /// Record the failure and carry on with the remaining passes.
    #[default]
    Continue,
    /// Return the first failure to the caller.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Resource conflicts are reported as diagnostics.
    #[default]
    Permissive,
    /// Any resource conflict fails the compile.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderGraphConfig {
    pub resilience: ResilienceMode,
    pub validation: ValidationMode,
    pub aliasing_enabled: bool,
    pub profiling_enabled: bool,
}

impl Default for RenderGraphConfig {
    fn default() -> Self {
        Self {
            resilience: ResilienceMode::Continue,
            validation: ValidationMode::Permissive,
            aliasing_enabled: true,
            profiling_enabled: true,
        }
    }
}

impl RenderGraphConfig {
    pub fn with_resilience(mut self, resilience: ResilienceMode) -> Self {
        self.resilience = resilience;
        self
    }

    pub fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_aliasing(mut self, enabled: bool) -> Self {
        self.aliasing_enabled = enabled;
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiling_enabled = enabled;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.validation == ValidationMode::Strict
    }
}
