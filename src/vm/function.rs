use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::instruction::Instruction;

/// Registry index of a compiled function. Stable across registry growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionHandle(pub(crate) u32);

impl FunctionHandle {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a function came from, for error reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub line: usize,
    pub column: usize,
}

impl SourceInfo {
    pub fn named(name: impl Into<String>) -> Self {
        SourceInfo { name: Some(name.into()), ..SourceInfo::default() }
    }
}

/// Extension data attached to intrinsic-backed functions. Dropping the last
/// clone runs the data's destructor.
pub type PrivateData = Arc<dyn Any + Send + Sync>;

/// A compiled function. Immutable once installed in the registry.
#[derive(Clone, Default)]
pub struct FunctionCode {
    pub program: Vec<Instruction>,
    /// Set when the whole body folded to one value; `program` is then empty.
    pub constant: Option<f64>,
    /// Number of stack results for vector functions, 0 for scalar ones.
    pub return_size: u32,
    pub parameters: Vec<String>,
    pub locals: Vec<String>,
    pub source: SourceInfo,
    pub private_data: Option<PrivateData>,
}

impl FunctionCode {
    pub fn new(source: SourceInfo, parameters: Vec<String>) -> Self {
        FunctionCode { source, parameters, ..FunctionCode::default() }
    }

    pub fn constant(source: SourceInfo, parameters: Vec<String>, value: f64) -> Self {
        FunctionCode { constant: Some(value), ..FunctionCode::new(source, parameters) }
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_vector(&self) -> bool {
        self.return_size > 0
    }

    /// Handles named by this function's `call` instructions, one per call.
    pub fn callees(&self) -> impl Iterator<Item = FunctionHandle> + '_ {
        self.program.iter().filter_map(Instruction::callee)
    }

    pub fn private<T: Any>(&self) -> Option<&T> {
        self.private_data.as_deref().and_then(|d| d.downcast_ref::<T>())
    }
}

impl fmt::Debug for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCode")
            .field("program", &self.program)
            .field("constant", &self.constant)
            .field("return_size", &self.return_size)
            .field("parameters", &self.parameters)
            .field("locals", &self.locals)
            .field("source", &self.source)
            .field("private_data", &self.private_data.is_some())
            .finish()
    }
}
