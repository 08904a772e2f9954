use super::Span;

/// Line index of a function body, for turning spans into positions.
/// Columns count characters, not bytes.
pub struct SourceMap<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> SourceMap<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        SourceMap { source, line_starts }
    }

    /// 1-based line and column of a byte offset. Offsets past the end land
    /// just after the last character.
    pub fn position(&self, offset: usize) -> (usize, usize) {
        let offset = self.clamp(offset);
        let line = self.line_starts.partition_point(|&s| s <= offset) - 1;
        let col = self.source[self.line_starts[line]..offset].chars().count();
        (line + 1, col + 1)
    }

    /// Text of a 1-based line without its line ending.
    pub fn line(&self, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.line_starts.get(i)) else {
            return "";
        };
        let end = self.line_starts.get(line).map_or(self.source.len(), |&next| next - 1);
        self.source[start..end].trim_end_matches('\r')
    }

    /// Characters of `span` on its first line, at least one so an empty
    /// span at the end of input still gets a caret.
    pub fn width(&self, span: Span) -> usize {
        let start = self.clamp(span.start);
        let end = self.clamp(span.end.max(start));
        let text = &self.source[start..end];
        text.split('\n').next().map_or(0, |l| l.chars().count()).max(1)
    }

    fn clamp(&self, offset: usize) -> usize {
        let mut offset = offset.min(self.source.len());
        while !self.source.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }
}
