pub mod ansi;
pub mod json;
pub mod registry;

use crate::ast::Span;
use crate::codegen::CompileError;
use crate::vm::VmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable `FN-…` code, see `registry::REGISTRY`.
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic { severity: Severity::Warning, ..Diagnostic::error(message) }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_secondary_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: false });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Moves every label `offset` bytes right, for spans taken from a
    /// slice of the text the diagnostic is shown against.
    pub fn shifted(mut self, offset: usize) -> Self {
        for l in &mut self.labels {
            l.span = Span { start: l.span.start + offset, end: l.span.end + offset };
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Registry code of a VM error.
pub fn vm_error_code(e: &VmError) -> &'static str {
    match e {
        VmError::FloatingPoint { .. } => "FN-R001",
        VmError::Runtime { .. } => "FN-R002",
        VmError::UnknownFunction { .. } | VmError::AlreadyDefined { .. } => "FN-R003",
        VmError::TooManyFunctions { .. } | VmError::TooManyConstants { .. } => "FN-R004",
    }
}

// ---- From impls for the error types of each phase ----

impl From<&crate::lexer::LexError> for Diagnostic {
    fn from(e: &crate::lexer::LexError) -> Self {
        Diagnostic::from(&crate::parser::ParseError::from_lex(e))
    }
}

impl From<&crate::parser::ParseError> for Diagnostic {
    fn from(e: &crate::parser::ParseError) -> Self {
        let mut d = Diagnostic::error(&e.message).with_code(e.code);
        if e.span != Span::UNKNOWN {
            d = d.with_span(e.span, "here");
        }
        if let Some(hint) = &e.hint {
            d = d.with_suggestion(hint.clone());
        }
        d
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        match e {
            CompileError::Parse(p) => Diagnostic::from(p),
            CompileError::Vm(v) => Diagnostic::from(v),
            CompileError::Lowering { code, span, message } => {
                let d = Diagnostic::error(message).with_code(code);
                if *span == Span::UNKNOWN { d } else { d.with_span(*span, "here") }
            }
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        let mut d = Diagnostic::error(e.to_string()).with_code(vm_error_code(e));
        if let Some(site) = e.site() {
            if let Some(file) = &site.filename {
                d = d.with_note(format!("defined in {file} line {}", site.line));
            }
        }
        d
    }
}

impl From<&crate::interpreter::RuntimeError> for Diagnostic {
    fn from(e: &crate::interpreter::RuntimeError) -> Self {
        Diagnostic::error(&e.message).with_code("FN-R002")
    }
}

impl From<&crate::config::ConfigError> for Diagnostic {
    fn from(e: &crate::config::ConfigError) -> Self {
        Diagnostic::error(e.to_string())
    }
}
