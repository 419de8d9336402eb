//! Virtual source buffers for incremental input
//!
//! Every fragment handed to the frontend gets its own buffer carved out of
//! one unbounded virtual file. Offsets only ever grow, so diagnostics and
//! declarations from different fragments never share a location.

use std::fmt;

/// First offset handed out. Offset 0 is reserved as the invalid location.
const FIRST_VIRTUAL_OFFSET: u32 = 100;

/// A position in the virtual file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourceLocation(u32);

impl SourceLocation {
    pub const INVALID: SourceLocation = SourceLocation(0);

    pub fn from_offset(offset: u32) -> Self {
        SourceLocation(offset)
    }

    pub fn offset(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Location `delta` bytes further into the virtual file.
    pub fn with_offset(self, delta: u32) -> Self {
        SourceLocation(self.0 + delta)
    }
}

/// Identifier of one fragment buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(u32);

impl FileId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input_line_{}", self.0)
    }
}

/// A location resolved back to its fragment, 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresumedLoc {
    pub file: FileId,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for PresumedLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

struct Buffer {
    id: FileId,
    start: u32,
    text: String,
}

/// Owner of all fragment buffers and of the virtual offset cursor.
pub struct SourceManager {
    buffers: Vec<Buffer>,
    next_offset: u32,
}

impl SourceManager {
    pub fn new() -> Self {
        SourceManager {
            buffers: Vec::new(),
            next_offset: FIRST_VIRTUAL_OFFSET,
        }
    }

    /// Register a fragment and return its buffer id and start location.
    ///
    /// The cursor advances past the whole fragment plus one byte so that the
    /// end of one buffer never coincides with the start of the next.
    pub fn create_buffer(&mut self, text: &str) -> (FileId, SourceLocation) {
        let id = FileId(self.buffers.len() as u32 + 1);
        let start = self.next_offset;
        self.next_offset = start.saturating_add(text.len() as u32 + 1);
        self.buffers.push(Buffer {
            id,
            start,
            text: text.to_string(),
        });
        (id, SourceLocation(start))
    }

    /// Next unique location, consuming one offset of the virtual file.
    pub fn next_unique_location(&mut self) -> SourceLocation {
        let loc = SourceLocation(self.next_offset);
        self.next_offset = self.next_offset.saturating_add(1);
        loc
    }

    pub fn buffer_text(&self, id: FileId) -> Option<&str> {
        self.buffers
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.text.as_str())
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Map a location back to the fragment it came from.
    pub fn resolve(&self, loc: SourceLocation) -> Option<PresumedLoc> {
        if !loc.is_valid() {
            return None;
        }
        // Buffers are sorted by start offset.
        let idx = match self.buffers.binary_search_by_key(&loc.0, |b| b.start) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let buffer = &self.buffers[idx];
        let rel = (loc.0 - buffer.start) as usize;
        if rel > buffer.text.len() {
            return None;
        }
        let before = &buffer.text[..floor_char_boundary(&buffer.text, rel)];
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(nl) => before.len() - nl,
            None => before.len() + 1,
        };
        Some(PresumedLoc {
            file: buffer.id,
            line,
            column,
        })
    }
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_never_overlap() {
        let mut sm = SourceManager::new();
        let (a, la) = sm.create_buffer("int f();");
        let (b, lb) = sm.create_buffer("");
        let (c, lc) = sm.create_buffer("f()");
        assert!(a < b && b < c);
        assert!(la < lb && lb < lc);
        assert_eq!(la.offset(), 100);
        assert_eq!(lb.offset(), 100 + 9);
        assert_eq!(lc.offset(), lb.offset() + 1);
    }

    #[test]
    fn test_unique_location_advances() {
        let mut sm = SourceManager::new();
        let l1 = sm.next_unique_location();
        let l2 = sm.next_unique_location();
        assert_eq!(l2.offset(), l1.offset() + 1);
        let (_, start) = sm.create_buffer("x");
        assert!(start > l2);
    }

    #[test]
    fn test_resolve_line_and_column() {
        let mut sm = SourceManager::new();
        let (_, _) = sm.create_buffer("int a;");
        let (id, start) = sm.create_buffer("int b;\nint c = d;");
        let loc = start.with_offset(15);
        let presumed = sm.resolve(loc).unwrap();
        assert_eq!(presumed.file, id);
        assert_eq!(presumed.line, 2);
        assert_eq!(presumed.column, 9);
        assert!(sm.resolve(SourceLocation::INVALID).is_none());
        assert_eq!(sm.buffer_text(id), Some("int b;\nint c = d;"));
    }
}
