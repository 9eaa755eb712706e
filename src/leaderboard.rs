use crate::board::{
    Board,
    Cell,
    UNOWNED,
};
use itertools::Itertools;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderEntry {
    pub owner: u32,
    pub pixels: u32,
    /// Filled in once the owner index has been resolved on the ledger.
    pub account_id: Option<String>,
}

/// Pixels per owner, unowned cells excluded.
pub fn tally<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> BTreeMap<u32, u32> {
    let mut counts = BTreeMap::new();
    for cell in cells {
        if cell.owner != UNOWNED {
            *counts.entry(cell.owner).or_insert(0) += 1;
        }
    }
    counts
}

/// Count descending, then owner index ascending.
pub fn rank(counts: &BTreeMap<u32, u32>) -> Vec<(u32, u32)> {
    counts
        .iter()
        .map(|(&owner, &pixels)| (owner, pixels))
        .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
        .collect()
}

#[derive(Debug, Default)]
pub struct Leaderboard {
    ranking: Vec<(u32, u32)>,
    counts: BTreeMap<u32, u32>,
    identities: BTreeMap<u32, String>,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-tally the board. Returns the owners that are new or whose count moved; those
    /// are the ones worth looking up again.
    pub fn update(&mut self, board: &Board) -> Vec<u32> {
        let counts = tally(board.cells());
        let changed = counts
            .iter()
            .filter(|&(owner, pixels)| self.counts.get(owner) != Some(pixels))
            .map(|(&owner, _)| owner)
            .collect();
        self.ranking = rank(&counts);
        self.counts = counts;
        changed
    }

    pub fn resolve(&mut self, owner: u32, account_id: String) {
        self.identities.insert(owner, account_id);
    }

    pub fn account_id(&self, owner: u32) -> Option<&str> {
        self.identities.get(&owner).map(String::as_str)
    }

    pub fn entries(&self) -> Vec<LeaderEntry> {
        self.ranking
            .iter()
            .map(|&(owner, pixels)| LeaderEntry {
                owner,
                pixels,
                account_id: self.identities.get(&owner).cloned(),
            })
            .collect()
    }
}
