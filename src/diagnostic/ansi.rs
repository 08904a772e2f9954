use super::{Diagnostic, Label, Severity};
use crate::ast::SourceMap;

/// Human readable rendering with source excerpts, optionally coloured.
pub struct AnsiRenderer {
    pub use_color: bool,
}

const RED: &str = "1;31";
const YELLOW: &str = "1;33";
const BLUE: &str = "1;34";
const BOLD: &str = "1";

impl AnsiRenderer {
    fn paint(&self, style: &str, s: &str) -> String {
        if self.use_color {
            format!("\x1b[{style}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let (word, accent) = match d.severity {
            Severity::Error => ("error", RED),
            Severity::Warning => ("warning", YELLOW),
        };
        let head = match d.code {
            Some(code) => format!("{word}[{code}]"),
            None => word.to_string(),
        };
        let mut out = format!("{}: {}\n", self.paint(accent, &head), self.paint(BOLD, &d.message));

        if let Some(source) = d.source.as_deref() {
            let map = SourceMap::new(source);
            let mut labels: Vec<&Label> = d.labels.iter().collect();
            // primary first, the rest in source order
            labels.sort_by_key(|l| (!l.is_primary, l.span.start));
            if let Some(first) = labels.first() {
                let (line, col) = map.position(first.span.start);
                let gutter = labels.iter().map(|l| map.position(l.span.start).0).max().unwrap_or(line).to_string().len();
                let pad = " ".repeat(gutter);
                let bar = self.paint(BLUE, "|");

                out.push_str(&format!("{pad}{} {line}:{col}\n", self.paint(BLUE, "-->")));
                out.push_str(&format!("{pad} {bar}\n"));
                let mut shown = None;
                for label in labels {
                    let (line, col) = map.position(label.span.start);
                    if shown != Some(line) {
                        let number = self.paint(BLUE, &format!("{line:>gutter$}"));
                        out.push_str(&format!("{number} {bar} {}\n", map.line(line)));
                        shown = Some(line);
                    }
                    let (mark, style) = if label.is_primary { ('^', accent) } else { ('-', BLUE) };
                    let underline = mark.to_string().repeat(map.width(label.span));
                    let text = if label.message.is_empty() {
                        underline
                    } else {
                        format!("{underline} {}", label.message)
                    };
                    out.push_str(&format!("{pad} {bar} {}{}\n", " ".repeat(col - 1), self.paint(style, &text)));
                }
                out.push_str(&format!("{pad} {bar}\n"));
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {note}\n", self.paint(BLUE, "=")));
        }
        if let Some(help) = &d.suggestion {
            out.push_str(&format!("  {} help: {help}\n", self.paint(BLUE, "=")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn plain(d: &Diagnostic) -> String {
        AnsiRenderer { use_color: false }.render(d)
    }

    fn division(source: &str) -> Diagnostic {
        let at = source.find('/').unwrap();
        Diagnostic::error("Division by zero.")
            .with_code("FN-C002")
            .with_span(Span { start: at, end: source.len() }, "here")
            .with_source(source)
    }

    #[test]
    fn header_names_code() {
        let out = plain(&division("x / 0"));
        assert!(out.starts_with("error[FN-C002]: Division by zero.\n"), "{out}");
        let out = plain(&Diagnostic::warning("Zero power optimised to constant 1.0!"));
        assert!(out.starts_with("warning: Zero power"), "{out}");
    }

    #[test]
    fn excerpt_underlines_span() {
        let out = plain(&division("sin(x) / 0"));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], " --> 1:8");
        assert_eq!(lines[3], "1 | sin(x) / 0");
        assert_eq!(lines[4], "  |        ^^^ here");
    }

    #[test]
    fn second_line_of_a_body() {
        let src = "select(x,\n  1 / 0,\n  y)";
        let out = plain(&division(src));
        assert!(out.contains(" --> 2:5"), "{out}");
        assert!(out.contains("2 |   1 / 0,"), "{out}");
        // carets stop at the end of the line
        assert!(out.contains("  |     ^^^^ here"), "{out}");
    }

    #[test]
    fn secondary_labels_use_dashes() {
        let src = "f(x) + g(y, 1)";
        let d = Diagnostic::error("Invalid number of parameters: 2 supplied, 3 required!")
            .with_code("FN-C001")
            .with_span(Span { start: 7, end: 14 }, "this call")
            .with_secondary_span(Span { start: 0, end: 4 }, "fine")
            .with_source(src);
        let out = plain(&d);
        assert_eq!(out.matches(src).count(), 1, "{out}");
        assert!(out.contains("^^^^^^^ this call"), "{out}");
        assert!(out.contains("  | ---- fine"), "{out}");
    }

    #[test]
    fn notes_and_help_follow() {
        let d = division("x / 0").with_note("in function 'f'").with_suggestion("divide by a non-zero value");
        let out = plain(&d);
        assert!(out.contains("= note: in function 'f'"), "{out}");
        assert!(out.trim_end().ends_with("= help: divide by a non-zero value"), "{out}");
    }

    #[test]
    fn without_source_only_the_header() {
        let out = plain(&Diagnostic::error("Floating-point exception detected in unnamed function.").with_code("FN-R001"));
        assert_eq!(out, "error[FN-R001]: Floating-point exception detected in unnamed function.\n");
    }

    #[test]
    fn colour_only_when_asked() {
        let d = division("x / 0");
        assert!(!plain(&d).contains('\x1b'));
        let coloured = AnsiRenderer { use_color: true }.render(&d);
        assert!(coloured.starts_with("\x1b[1;31merror[FN-C002]\x1b[0m"), "{coloured}");
    }
}
