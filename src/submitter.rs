use crate::{
    board::Board,
    queue::{
        EditQueue,
        PendingEdit,
    },
};
use tracing::{
    debug,
    warn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitterState {
    Idle,
    Sending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Batch went back to the front of the queue.
    Requeued { attempt: u32 },
    /// Too many consecutive failures: batch and queue were discarded.
    Dropped { edits: usize },
}

/// Drains the queue one bounded batch at a time. Owns the single in-flight batch.
#[derive(Debug)]
pub struct BatchSubmitter {
    batch_size: usize,
    max_failures: u32,
    pending: Vec<PendingEdit>,
    state: SubmitterState,
    consecutive_failures: u32,
}

impl BatchSubmitter {
    pub fn new(batch_size: usize, max_failures: u32) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_failures: max_failures.max(1),
            pending: Vec::new(),
            state: SubmitterState::Idle,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> SubmitterState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SubmitterState::Idle
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn in_flight(&self) -> &[PendingEdit] {
        &self.pending
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// A full batch is waiting and nothing is being sent.
    pub fn batch_ready(&self, queue: &EditQueue) -> bool {
        self.is_idle() && queue.len() >= self.batch_size
    }

    /// Move up to one batch from the queue into flight. `None` while a batch is already
    /// out or the queue is empty.
    pub fn begin(&mut self, queue: &mut EditQueue) -> Option<Vec<PendingEdit>> {
        if !self.is_idle() || queue.is_empty() {
            return None;
        }
        self.pending = queue.drain_up_to(self.batch_size);
        self.state = SubmitterState::Sending;
        debug!(edits = self.pending.len(), "batch in flight");
        Some(self.pending.clone())
    }

    pub fn on_success(&mut self, queue: &EditQueue, board: &mut Board) -> usize {
        let confirmed = std::mem::take(&mut self.pending);
        for edit in &confirmed {
            // A newer queued edit for the cell keeps its color in the overlay.
            if !queue.contains_cell(edit.x, edit.y) {
                board.clear_overlay(edit.x, edit.y);
            }
        }
        self.consecutive_failures = 0;
        self.state = SubmitterState::Idle;
        confirmed.len()
    }

    pub fn on_failure(&mut self, queue: &mut EditQueue, board: &mut Board) -> FailureOutcome {
        let batch = std::mem::take(&mut self.pending);
        self.state = SubmitterState::Idle;
        self.consecutive_failures += 1;
        if self.consecutive_failures < self.max_failures {
            let attempt = self.consecutive_failures;
            warn!(attempt, edits = batch.len(), "batch failed, requeueing");
            queue.requeue_front(batch);
            return FailureOutcome::Requeued { attempt };
        }
        let mut dropped = batch;
        dropped.extend(queue.clear());
        for edit in &dropped {
            board.clear_overlay(edit.x, edit.y);
        }
        warn!(
            edits = dropped.len(),
            failures = self.consecutive_failures,
            "giving up on pending edits"
        );
        self.consecutive_failures = 0;
        FailureOutcome::Dropped {
            edits: dropped.len(),
        }
    }
}
