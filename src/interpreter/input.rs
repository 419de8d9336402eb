//! Multi-line prompt input.
//!
//! Lines are collected until every bracket opened so far is closed, so a
//! function typed over several lines reaches the parser as one fragment.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Complete,
    Incomplete,
    /// A closing bracket that matches nothing. The collected input is
    /// dropped.
    Mismatch,
}

#[derive(Debug, Default)]
pub struct InputValidator {
    input: String,
    /// Open brackets, innermost last.
    stack: Vec<u8>,
    in_block_comment: bool,
}

impl InputValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `line` to the pending input and report whether it is ready.
    pub fn validate(&mut self, line: &str) -> ValidationResult {
        if !self.input.is_empty() {
            self.input.push('\n');
        }
        self.input.push_str(line);

        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if self.in_block_comment {
                if c == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    self.in_block_comment = false;
                    i += 1;
                }
                i += 1;
                continue;
            }
            match c {
                b'/' if bytes.get(i + 1) == Some(&b'/') => break,
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    self.in_block_comment = true;
                    i += 1;
                }
                b'(' | b'{' | b'[' => self.stack.push(c),
                b')' | b'}' | b']' => {
                    let open = match c {
                        b')' => b'(',
                        b'}' => b'{',
                        _ => b'[',
                    };
                    if self.stack.pop() != Some(open) {
                        self.reset();
                        return ValidationResult::Mismatch;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        let continued = line.trim_end().ends_with('\\');
        if continued {
            // Drop the backslash, the next line continues this one.
            let trimmed = self.input.trim_end().len() - 1;
            self.input.truncate(trimmed);
        }
        if self.stack.is_empty() && !self.in_block_comment && !continued {
            ValidationResult::Complete
        } else {
            ValidationResult::Incomplete
        }
    }

    /// The collected input; the validator starts over.
    pub fn take_input(&mut self) -> String {
        let input = std::mem::take(&mut self.input);
        self.reset();
        input
    }

    pub fn reset(&mut self) {
        self.input.clear();
        self.stack.clear();
        self.in_block_comment = false;
    }

    pub fn is_pending(&self) -> bool {
        !self.input.is_empty()
    }
}
