use serde::Serialize;

/// The contiguous prefix `[origin, last_block]` of blocks that are durably written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub origin: u64,
    pub last_block: u64,
}

impl Checkpoint {
    pub fn new(origin: u64, last_block: u64) -> Self {
        Self { origin, last_block }
    }

    /// First block not yet covered by the checkpoint.
    pub fn next_block(&self) -> u64 {
        self.last_block.saturating_add(1)
    }

    /// Checkpoint after `[start, end]` has been durably written, or `None` when
    /// the write does not change it.
    ///
    /// The prefix only grows across ranges that touch it, so a write beyond a
    /// gap is kept but never counted.
    pub fn advance(current: Option<Checkpoint>, start: u64, end: u64) -> Option<Checkpoint> {
        if start > end {
            return None;
        }

        let Some(current) = current else {
            return Some(Checkpoint::new(start, end));
        };

        let mut next = current;
        if start <= current.next_block() && end > current.last_block {
            next.last_block = end;
        }
        if start < current.origin && end.saturating_add(1) >= current.origin {
            next.origin = start;
        }

        (next != current).then_some(next)
    }
}
