use crate::board::Board;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEdit {
    pub x: usize,
    pub y: usize,
    pub color: u32,
}

impl PendingEdit {
    pub fn new(x: usize, y: usize, color: u32) -> Self {
        Self { x, y, color }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Queued,
    /// Same color as what is already pending, or as the confirmed cell.
    Duplicate,
    InsufficientBalance,
    OutOfBounds,
}

/// What the account can still pay for, measured against the last confirmed balance.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub confirmed_balance: u128,
    pub pixel_cost: u128,
    pub in_flight: usize,
}

impl Budget {
    fn covers(&self, outstanding: usize) -> bool {
        let needed = (outstanding as u128).saturating_mul(self.pixel_cost);
        self.confirmed_balance >= needed
    }
}

/// Edits accepted locally but not yet handed to the submitter, oldest first.
/// The same cell may appear more than once; the newest entry wins.
#[derive(Debug, Default)]
pub struct EditQueue {
    entries: VecDeque<PendingEdit>,
}

impl EditQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingEdit> + '_ {
        self.entries.iter()
    }

    pub fn contains_cell(&self, x: usize, y: usize) -> bool {
        self.entries.iter().any(|e| e.x == x && e.y == y)
    }

    pub fn offer(&mut self, board: &mut Board, edit: PendingEdit, budget: Budget) -> OfferOutcome {
        let PendingEdit { x, y, color } = edit;
        let Ok(confirmed) = board.cell(x, y) else {
            return OfferOutcome::OutOfBounds;
        };
        match board.overlay_color(x, y) {
            Some(pending) if pending == color => return OfferOutcome::Duplicate,
            None if confirmed.color == color => return OfferOutcome::Duplicate,
            _ => {}
        }
        if !budget.covers(self.entries.len() + budget.in_flight + 1) {
            return OfferOutcome::InsufficientBalance;
        }
        self.entries.push_back(edit);
        board.set_overlay(x, y, color);
        OfferOutcome::Queued
    }

    pub fn drain_up_to(&mut self, n: usize) -> Vec<PendingEdit> {
        let n = n.min(self.entries.len());
        self.entries.drain(..n).collect()
    }

    /// Put a batch back ahead of everything queued since, keeping its order.
    pub fn requeue_front(&mut self, batch: Vec<PendingEdit>) {
        for edit in batch.into_iter().rev() {
            self.entries.push_front(edit);
        }
    }

    pub fn clear(&mut self) -> Vec<PendingEdit> {
        self.entries.drain(..).collect()
    }
}
