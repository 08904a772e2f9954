//! Register/stack virtual machine for compiled scalar functions.
//!
//! A `FunctionVM` owns the function registry, the constant pool and the
//! global store. Evaluation happens in an `FPUContext`, which owns the
//! operand stack and call frames and borrows the VM immutably, so any number
//! of contexts can evaluate the same registry at once.

use std::fmt;

pub mod context;
pub mod function;
pub mod instruction;
pub mod intrinsics;
pub mod registry;
pub mod traps;

pub use context::{ContextPool, ContextStats, FPUContext};
pub use function::{FunctionCode, FunctionHandle, PrivateData, SourceInfo};
pub use instruction::{Address, BinOp, Cond, Instruction, Reg};
pub use registry::FunctionVM;

// ── Errors ───────────────────────────────────────────────────────────

/// The function an error was raised in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorSite {
    pub function: Option<String>,
    pub filename: Option<String>,
    pub line: usize,
}

impl ErrorSite {
    pub fn from_source(source: &SourceInfo) -> Self {
        ErrorSite { function: source.name.clone(), filename: source.filename.clone(), line: source.line }
    }
}

impl fmt::Display for ErrorSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "function '{name}'"),
            None => write!(f, "unnamed function"),
        }
    }
}

/// The resource a runtime error exhausted or the invariant it broke.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeFault {
    #[error("Maximum function evaluation recursion level reached.")]
    RecursionLimit,
    #[error("Function evaluation stack overflow.")]
    StackOverflow,
    #[error("Function evaluation stack underflow.")]
    StackUnderflow,
    #[error("Stack full. Possible infinite recursive function call.")]
    StackFull,
    #[error("Program counter left the function body.")]
    ProgramCounter,
    #[error("Unknown intrinsic {0}.")]
    UnknownIntrinsic(u32),
    #[error("Global store slot {0} does not exist.")]
    GlobalOutOfRange(usize),
    #[error("Internal function failed: {0}")]
    Trap(&'static str),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error(
        "Floating-point exception detected in {site}. Your function either attempted a division by zero, \
         used a function outside its domain or called an internal function with invalid parameters."
    )]
    FloatingPoint { site: ErrorSite },
    #[error("Runtime error detected in {site}. {fault}")]
    Runtime { site: ErrorSite, fault: RuntimeFault },
    #[error("Unknown user defined function.")]
    UnknownFunction { handle: FunctionHandle },
    #[error("Function {handle} is already defined.")]
    AlreadyDefined { handle: FunctionHandle },
    #[error("Maximum number of {limit} functions per scene reached.")]
    TooManyFunctions { limit: u32 },
    #[error("More than {limit} constants in all functions are not supported.")]
    TooManyConstants { limit: u32 },
}

impl VmError {
    pub fn site(&self) -> Option<&ErrorSite> {
        match self {
            VmError::FloatingPoint { site } | VmError::Runtime { site, .. } => Some(site),
            _ => None,
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_names_function() {
        let named = ErrorSite { function: Some("f".into()), ..ErrorSite::default() };
        assert_eq!(named.to_string(), "function 'f'");
        assert_eq!(ErrorSite::default().to_string(), "unnamed function");
    }

    #[test]
    fn floating_point_message() {
        let e = VmError::FloatingPoint { site: ErrorSite { function: Some("g".into()), ..ErrorSite::default() } };
        let msg = e.to_string();
        assert!(msg.starts_with("Floating-point exception detected in function 'g'."));
        assert!(msg.contains("division by zero"));
    }

    #[test]
    fn runtime_message_carries_fault() {
        let e = VmError::Runtime { site: ErrorSite::default(), fault: RuntimeFault::RecursionLimit };
        assert_eq!(
            e.to_string(),
            "Runtime error detected in unnamed function. Maximum function evaluation recursion level reached."
        );
        assert!(e.site().is_some());
        assert!(VmError::TooManyFunctions { limit: 4 }.site().is_none());
    }
}
