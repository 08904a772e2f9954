use std::path::Path;

use serde::{Deserialize, Serialize};

/// Largest immediate operand; also the default ceiling for the registry,
/// the constant pool and the operand stack.
pub const MAX_K: u32 = 0xFFFFF;
pub const MAX_CALL_STACK_SIZE: usize = 1024;
pub const INITIAL_DBL_STACK_SIZE: usize = 256;
/// Parameters per function and live `sum`/`prod` locals per function.
pub const MAX_FUNCTION_PARAMETER_LIST: usize = 56;

/// Resource limits of one `FunctionVM` and the contexts created from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    pub max_functions: u32,
    pub max_constants: u32,
    pub max_call_depth: usize,
    pub initial_stack_size: usize,
    pub max_stack_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_functions: MAX_K,
            max_constants: MAX_K,
            max_call_depth: MAX_CALL_STACK_SIZE,
            initial_stack_size: INITIAL_DBL_STACK_SIZE,
            max_stack_size: MAX_K as usize,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

impl VmConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: VmConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_call_depth == 0 {
            return Err(ConfigError::Invalid("max_call_depth must be at least 1"));
        }
        if self.initial_stack_size == 0 {
            return Err(ConfigError::Invalid("initial_stack_size must be at least 1"));
        }
        if self.max_constants < 2 {
            return Err(ConfigError::Invalid("max_constants must leave room for 0.0 and 1.0"));
        }
        if self.max_stack_size < self.initial_stack_size {
            return Err(ConfigError::Invalid("max_stack_size is below initial_stack_size"));
        }
        Ok(())
    }
}
