//! Taken from the lexer in https://github.com/rozukke/mimi

/// Forward-only view over the preprocessed source.
pub struct Cursor<'a> {
    len_remaining: usize,
    /// Index that the cursor is pointing to in the source
    curr_pt: usize,
    /// Current 1-based line
    line: usize,
    chars: &'a str,
}

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str) -> Cursor<'a> {
        Cursor {
            len_remaining: input.len(),
            curr_pt: 0,
            line: 1,
            chars: input,
        }
    }

    /// File is finished lexing
    pub fn is_eof(&self) -> bool {
        self.len_remaining == 0
    }

    /// Return slice of input starting at the current point of the cursor
    pub fn at_curr_pt(&self) -> &'a str {
        &self.chars[self.curr_pt..]
    }

    /// Move cursor ahead in the input by given amount, counting passed line breaks
    pub fn advance(&mut self, amt: usize) {
        let passed = &self.chars[self.curr_pt..self.curr_pt + amt];
        self.line += passed.matches('\n').count();
        self.curr_pt += amt;
        self.len_remaining -= amt;
    }

    pub fn line(&self) -> usize {
        self.line
    }

    /// Rest of the current line, for error messages
    pub fn rest_of_line(&self) -> &'a str {
        let rest = self.at_curr_pt();
        rest.split('\n').next().unwrap_or(rest).trim()
    }
}

#[cfg(test)]
mod tests {
    use super::Cursor;

    #[test]
    fn tracks_lines() {
        let mut cur = Cursor::new("ab\ncd\n");
        cur.advance(2);
        assert_eq!(cur.line(), 1);
        assert_eq!(cur.rest_of_line(), "");
        cur.advance(1);
        assert_eq!(cur.line(), 2);
        assert_eq!(cur.rest_of_line(), "cd");
        cur.advance(3);
        assert!(cur.is_eof());
    }
}
