//! Byte spans and conversions between byte offsets and LSP positions.
//!
//! The document model records every range as a byte [`Span`] into the
//! source text. LSP positions use 0-indexed lines and UTF-16 code unit
//! columns; [`LineIndex`] converts in both directions.

use tower_lsp::lsp_types::{Position, Range};

/// Half-open byte range `[start, end)` into a document's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Zero-width span at `offset`
    pub fn empty(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `offset` lies inside the span. The end offset is accepted so
    /// that a cursor placed right after a name still hits it.
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset <= self.end
    }

    pub fn contains_span(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Shift both ends by `delta` bytes
    pub fn offset(&self, delta: usize) -> Span {
        Span::new(self.start + delta, self.end + delta)
    }

    /// The text covered by the span, or an empty string if the span does not
    /// fit in `text`.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.start..self.end).unwrap_or("")
    }
}

/// Line index for byte offset <-> LSP position conversions.
///
/// Pre-computes line start byte offsets for O(log n) line lookups.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    /// Byte offset of the start of each line (0-indexed).
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { text, line_starts }
    }

    /// Get the 0-indexed line number for a byte offset.
    pub fn line_of(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line.saturating_sub(1),
        }
    }

    fn line_end(&self, line: usize) -> usize {
        self.line_starts
            .get(line + 1)
            .map(|&s| s.saturating_sub(1))
            .unwrap_or(self.text.len())
    }

    /// Convert a byte offset to an LSP position
    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = self.line_of(offset);
        let line_start = self.line_starts[line];
        let line_content = self.text.get(line_start..self.line_end(line)).unwrap_or("");

        Position {
            line: line as u32,
            character: byte_offset_to_utf16(line_content, offset - line_start),
        }
    }

    pub fn range(&self, span: Span) -> Range {
        Range {
            start: self.position(span.start),
            end: self.position(span.end),
        }
    }

    /// Convert an LSP position back to a byte offset. Positions past the end
    /// of a line clamp to the line end; lines past the end clamp to the end
    /// of the text.
    pub fn offset(&self, position: Position) -> usize {
        let line = position.line as usize;
        let Some(&line_start) = self.line_starts.get(line) else {
            return self.text.len();
        };
        let line_content = self.text.get(line_start..self.line_end(line)).unwrap_or("");

        line_start + utf16_to_byte_offset(line_content, position.character)
    }
}

/// Convert a byte offset within a line to UTF-16 code units.
fn byte_offset_to_utf16(line: &str, byte_offset: usize) -> u32 {
    let mut utf16_offset = 0u32;
    let mut current_byte = 0usize;

    for c in line.chars() {
        if current_byte >= byte_offset {
            break;
        }
        utf16_offset += c.len_utf16() as u32;
        current_byte += c.len_utf8();
    }

    utf16_offset
}

fn utf16_to_byte_offset(line: &str, utf16_offset: u32) -> usize {
    let mut units = 0u32;

    for (i, c) in line.char_indices() {
        if units >= utf16_offset {
            return i;
        }
        units += c.len_utf16() as u32;
    }

    line.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index_simple() {
        let text = "line1\nline2\nline3";
        let index = LineIndex::new(text);

        assert_eq!(index.line_of(0), 0);
        assert_eq!(index.line_of(5), 0);
        assert_eq!(index.line_of(6), 1);
        assert_eq!(index.line_of(12), 2);
    }

    #[test]
    fn test_position_and_offset_agree() {
        let text = "jobs:\n  build:\n    steps: [checkout]\n";
        let index = LineIndex::new(text);

        let offset = text.find("checkout").unwrap();
        let position = index.position(offset);
        assert_eq!(position, Position { line: 2, character: 12 });
        assert_eq!(index.offset(position), offset);
    }

    #[test]
    fn test_utf16_columns() {
        let text = "name: hi 👋 there";
        let index = LineIndex::new(text);

        let offset = text.find("there").unwrap();
        // The emoji is 4 UTF-8 bytes but 2 UTF-16 code units.
        assert_eq!(index.position(offset).character, 12);
        assert_eq!(index.offset(Position { line: 0, character: 12 }), offset);
    }

    #[test]
    fn test_offset_clamps_out_of_range_positions() {
        let text = "a: 1\nb: 2";
        let index = LineIndex::new(text);

        assert_eq!(index.offset(Position { line: 0, character: 99 }), 4);
        assert_eq!(index.offset(Position { line: 9, character: 0 }), text.len());
    }

    #[test]
    fn test_span_contains_and_slice() {
        let span = Span::new(2, 5);
        assert!(span.contains(2));
        assert!(span.contains(5));
        assert!(!span.contains(6));
        assert_eq!(span.slice("abcdefg"), "cde");
        assert_eq!(Span::new(4, 40).slice("abc"), "");
    }
}
