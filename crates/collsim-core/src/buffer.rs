//! Symbolic chunk buffers shared by a rank's threadblocks

use std::fmt;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// The unit of data transfer: an opaque identifier compared by equality.
/// No arithmetic is ever performed on chunk contents.
pub type Chunk = String;

/// The three buffer kinds every rank holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BufferKind {
    Input,
    Output,
    Scratch,
}

impl BufferKind {
    /// Parse the wire name used by plan documents (`i`, `o`, `s`)
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "i" => Ok(Self::Input),
            "o" => Ok(Self::Output),
            "s" => Ok(Self::Scratch),
            other => Err(Error::plan_load(format!("unknown buffer `{other}`"))),
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::Scratch => write!(f, "scratch"),
        }
    }
}

/// The three fixed-size chunk buffers of one rank.
///
/// Buffers are shared by all of the rank's threadblocks. Each vector sits
/// behind a mutex held only for the duration of a single range copy, which
/// rules out torn chunks but deliberately provides no cross-step ordering:
/// ordering between steps of different threadblocks is the plan's explicit
/// dependency contract. A plan that omits a dependency between a writer and
/// a reader of the same region observes stale or fresh chunks
/// nondeterministically.
#[derive(Debug)]
pub struct BufferSet {
    input: Mutex<Vec<Chunk>>,
    output: Mutex<Vec<Chunk>>,
    scratch: Mutex<Vec<Chunk>>,
}

impl BufferSet {
    /// Allocate the three buffers with the sizes declared in the plan.
    /// Sizes are fixed for the rank's lifetime.
    pub fn new(i_chunks: usize, o_chunks: usize, s_chunks: usize) -> Self {
        Self {
            input: Mutex::new(vec![Chunk::new(); i_chunks]),
            output: Mutex::new(vec![Chunk::new(); o_chunks]),
            scratch: Mutex::new(vec![Chunk::new(); s_chunks]),
        }
    }

    fn slot(&self, kind: BufferKind) -> &Mutex<Vec<Chunk>> {
        match kind {
            BufferKind::Input => &self.input,
            BufferKind::Output => &self.output,
            BufferKind::Scratch => &self.scratch,
        }
    }

    /// Number of chunks in the buffer of the given kind
    pub fn len(&self, kind: BufferKind) -> usize {
        self.slot(kind).lock().len()
    }

    /// True if the buffer of the given kind holds no chunks
    pub fn is_empty(&self, kind: BufferKind) -> bool {
        self.len(kind) == 0
    }

    /// Clone `count` chunks starting at `offset`, or `None` when the range
    /// falls outside the buffer.
    pub fn read_range(&self, kind: BufferKind, offset: i64, count: usize) -> Option<Vec<Chunk>> {
        let buf = self.slot(kind).lock();
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(count)?;
        buf.get(start..end).map(<[Chunk]>::to_vec)
    }

    /// Write `chunks` starting at `offset`; false when the range falls
    /// outside the buffer.
    pub fn write_range(&self, kind: BufferKind, offset: i64, chunks: &[Chunk]) -> bool {
        let mut buf = self.slot(kind).lock();
        let Ok(start) = usize::try_from(offset) else {
            return false;
        };
        let Some(end) = start.checked_add(chunks.len()) else {
            return false;
        };
        match buf.get_mut(start..end) {
            Some(range) => {
                range.clone_from_slice(chunks);
                true
            }
            None => false,
        }
    }

    /// Overwrite every chunk of a buffer from an index-keyed producer
    pub fn fill_with(&self, kind: BufferKind, mut f: impl FnMut(usize) -> Chunk) {
        let mut buf = self.slot(kind).lock();
        for (i, chunk) in buf.iter_mut().enumerate() {
            *chunk = f(i);
        }
    }

    /// Clone the whole buffer, for verification and inspection
    pub fn snapshot(&self, kind: BufferKind) -> Vec<Chunk> {
        self.slot(kind).lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_kind_wire_names() {
        assert_eq!(BufferKind::parse("i").unwrap(), BufferKind::Input);
        assert_eq!(BufferKind::parse("o").unwrap(), BufferKind::Output);
        assert_eq!(BufferKind::parse("s").unwrap(), BufferKind::Scratch);
        assert!(BufferKind::parse("x").is_err());
    }

    #[test]
    fn test_read_write_round_trip() {
        let buffers = BufferSet::new(4, 0, 0);
        let chunks = vec!["a".to_string(), "b".to_string()];
        assert!(buffers.write_range(BufferKind::Input, 1, &chunks));
        let read = buffers.read_range(BufferKind::Input, 1, 2).unwrap();
        assert_eq!(read, chunks);
    }

    #[test]
    fn test_out_of_bounds_ranges() {
        let buffers = BufferSet::new(4, 0, 0);
        assert!(buffers.read_range(BufferKind::Input, 3, 2).is_none());
        assert!(buffers.read_range(BufferKind::Input, -1, 1).is_none());
        assert!(!buffers.write_range(BufferKind::Input, 4, &["a".to_string()]));
        assert!(buffers.read_range(BufferKind::Output, 0, 1).is_none());
    }

    #[test]
    fn test_fill_with_indexes_every_chunk() {
        let buffers = BufferSet::new(3, 0, 0);
        buffers.fill_with(BufferKind::Input, |i| format!("c{i}"));
        assert_eq!(buffers.snapshot(BufferKind::Input), vec!["c0", "c1", "c2"]);
    }
}
