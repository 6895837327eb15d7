use std::ops::Range;

use miette::SourceSpan;

/// Holds a view into a source.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, Debug)]
pub struct Span {
    offs: usize,
    len: usize,
}

impl Span {
    pub fn new(offs: usize, len: usize) -> Self {
        Span { offs, len }
    }

    /// Span covering the text of a 1-based `line` in `src`, without its line break.
    ///
    /// Lines past the end of the source collapse to an empty span at the end.
    pub fn of_line(src: &str, line: usize) -> Self {
        let mut offs = 0;
        for (i, text) in src.split('\n').enumerate() {
            if i + 1 == line {
                let text = text.strip_suffix('\r').unwrap_or(text);
                return Span::new(offs, text.len());
            }
            offs += text.len() + 1;
        }
        Span::new(src.len(), 0)
    }

    pub fn as_range(&self) -> Range<usize> {
        self.offs..self.offs + self.len
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs.into(), value.len)
    }
}
