use serde::Serialize;

use super::{Diagnostic, Severity};
use crate::ast::SourceMap;

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    severity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    message: &'a str,
    labels: Vec<JsonLabel<'a>>,
    notes: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

#[derive(Serialize)]
struct JsonLabel<'a> {
    start: usize,
    end: usize,
    message: &'a str,
    primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    col: Option<usize>,
}

/// One diagnostic as a single line of JSON. Line and column are only
/// present when the diagnostic carries its source.
pub fn render(d: &Diagnostic) -> String {
    let map = d.source.as_deref().map(SourceMap::new);
    let labels = d
        .labels
        .iter()
        .map(|l| {
            let position = map.as_ref().map(|m| m.position(l.span.start));
            JsonLabel {
                start: l.span.start,
                end: l.span.end,
                message: &l.message,
                primary: l.is_primary,
                line: position.map(|p| p.0),
                col: position.map(|p| p.1),
            }
        })
        .collect();
    let out = JsonDiagnostic {
        severity: match d.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        },
        code: d.code,
        message: &d.message,
        labels,
        notes: &d.notes,
        suggestion: d.suggestion.as_deref(),
    };
    serde_json::to_string(&out)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"diagnostic could not be serialised"}"#.to_string())
}
