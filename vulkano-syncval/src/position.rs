//! Where in the submitted command stream an access was made.

use smallvec::SmallVec;
use std::{cmp::Ordering, fmt};

/// The position of a command in the command stream.
///
/// Positions carry the *positional* partial order: two positions on the same queue are ordered
/// by their submission, and within one batch by command buffer and command index. Positions in
/// different batches of one submission, or on different queues, are unordered. Semaphore edges
/// are layered on top by [`SyncValidator::happens_before`].
///
/// [`SyncValidator::happens_before`]: crate::SyncValidator::happens_before
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LogicalPosition {
    /// The queue the command was submitted to, or `None` when the command buffer was validated
    /// on its own.
    pub queue: Option<u32>,

    /// The index of the submission on the queue.
    pub submit: u32,

    /// The index of the batch on the queue, counted over all submissions.
    pub batch: u32,

    /// The index of the command buffer within its batch.
    pub command_buffer: u32,

    /// The index of the command within its primary command buffer.
    pub command: u32,

    /// The index of the command within the secondary command buffer executed by `command`.
    pub secondary_command: Option<u32>,

    /// The subpass the command was recorded in, if inside a render pass instance.
    pub subpass: Option<u32>,
}

/// A global, strictly increasing sequence number given to every replayed command.
pub type ResourceUseTag = u64;

/// Identifies one batch of one queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchRef {
    pub queue: u32,
    pub batch: u32,
}

impl LogicalPosition {
    /// Returns the batch the position belongs to, if it was submitted to a queue.
    #[inline]
    pub fn batch_ref(&self) -> Option<BatchRef> {
        self.queue.map(|queue| BatchRef {
            queue,
            batch: self.batch,
        })
    }
}

/// The set of batches ordered before some point of the command stream.
///
/// For each queue, every batch below a watermark belongs to the set. Sibling batches of one
/// submission are not ordered with each other, so a semaphore can order a single batch above
/// the watermark of its queue; those are kept aside until the watermark catches up with them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct BatchClock {
    watermarks: SmallVec<[u32; 4]>,
    extra: SmallVec<[BatchRef; 2]>,
}

impl BatchClock {
    pub(crate) fn contains(&self, batch: BatchRef) -> bool {
        batch.batch < self.watermark(batch.queue) || self.extra.contains(&batch)
    }

    fn watermark(&self, queue: u32) -> u32 {
        self.watermarks.get(queue as usize).copied().unwrap_or(0)
    }

    /// Orders the first `count` batches of `queue` before.
    pub(crate) fn advance(&mut self, queue: u32, count: u32) {
        let index = queue as usize;

        if self.watermarks.len() <= index {
            self.watermarks.resize(index + 1, 0);
        }

        let watermark = &mut self.watermarks[index];
        *watermark = (*watermark).max(count);

        // Absorb the batches the watermark has reached.
        while let Some(position) = self.extra.iter().position(|extra| {
            extra.queue == queue && extra.batch <= self.watermarks[index]
        }) {
            let extra = self.extra.swap_remove(position);
            let watermark = &mut self.watermarks[index];
            *watermark = (*watermark).max(extra.batch + 1);
        }
    }

    /// Orders `batch` before.
    pub(crate) fn insert(&mut self, batch: BatchRef) {
        if batch.batch == self.watermark(batch.queue) {
            self.advance(batch.queue, batch.batch + 1);
        } else if !self.contains(batch) {
            self.extra.push(batch);
        }
    }

    /// Adds every batch of `other`.
    pub(crate) fn merge(&mut self, other: &BatchClock) {
        for (queue, &count) in other.watermarks.iter().enumerate() {
            self.advance(queue as u32, count);
        }

        for &batch in &other.extra {
            self.insert(batch);
        }
    }

    /// Returns the number of values the clock holds.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.watermarks.len() + self.extra.len()
    }
}

impl PartialOrd for LogicalPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.queue != other.queue {
            return None;
        }

        if self.submit != other.submit {
            return Some(self.submit.cmp(&other.submit));
        }

        if self.batch != other.batch {
            return None;
        }

        Some(
            (
                self.command_buffer,
                self.command,
                self.secondary_command,
                self.subpass,
            )
                .cmp(&(
                    other.command_buffer,
                    other.command,
                    other.secondary_command,
                    other.subpass,
                )),
        )
    }
}

impl fmt::Display for LogicalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(queue) = self.queue {
            write!(
                f,
                "queue {}, submit {}, batch {}, ",
                queue, self.submit, self.batch,
            )?;
        }

        write!(
            f,
            "command buffer {}, command {}",
            self.command_buffer, self.command,
        )?;

        if let Some(secondary_command) = self.secondary_command {
            write!(f, " (secondary command {})", secondary_command)?;
        }

        if let Some(subpass) = self.subpass {
            write!(f, ", subpass {}", subpass)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(queue: u32, submit: u32, batch: u32, command: u32) -> LogicalPosition {
        LogicalPosition {
            queue: Some(queue),
            submit,
            batch,
            command,
            ..Default::default()
        }
    }

    #[test]
    fn batch_clock_watermarks() {
        let batch = |queue, batch| BatchRef { queue, batch };
        let mut clock = BatchClock::default();
        clock.advance(1, 3);
        assert!(clock.contains(batch(1, 2)));
        assert!(!clock.contains(batch(1, 3)));
        assert!(!clock.contains(batch(0, 0)));

        // A batch above the watermark, ordered on its own.
        clock.insert(batch(1, 5));
        assert!(clock.contains(batch(1, 5)));
        assert!(!clock.contains(batch(1, 4)));

        clock.insert(batch(1, 3));
        clock.insert(batch(1, 4));
        assert!(clock.contains(batch(1, 4)));
        assert_eq!(clock.len(), 2);

        let mut other = BatchClock::default();
        other.advance(0, 2);
        other.insert(batch(2, 7));
        clock.merge(&other);
        assert!(clock.contains(batch(0, 1)));
        assert!(clock.contains(batch(2, 7)));
        assert!(!clock.contains(batch(2, 6)));
    }

    #[test]
    fn positional_partial_order() {
        assert!(position(0, 0, 0, 1) < position(0, 0, 0, 2));
        assert!(position(0, 0, 0, 9) < position(0, 1, 1, 0));

        // Sibling batches of one submission.
        assert_eq!(
            position(0, 0, 0, 0).partial_cmp(&position(0, 0, 1, 0)),
            None,
        );

        // Different queues.
        assert_eq!(
            position(0, 0, 0, 0).partial_cmp(&position(1, 0, 0, 0)),
            None,
        );

        let secondary = LogicalPosition {
            secondary_command: Some(3),
            ..position(0, 0, 0, 1)
        };
        assert!(position(0, 0, 0, 1) < secondary);
        assert!(secondary < position(0, 0, 0, 2));
    }
}
