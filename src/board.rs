use crate::{
    error::BoardError,
    sync,
};

/// Owner index of cells nobody has painted yet.
pub const UNOWNED: u32 = 0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell {
    /// 24-bit RGB.
    pub color: u32,
    pub owner: u32,
}

/// Opaque per-row marker handed out by the ledger. Only compared for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowVersion(pub u64);

/// Local copy of the board: confirmed cells and row versions as last merged from the
/// ledger, plus the optimistic overlay of colors requested but not yet confirmed.
#[derive(Debug, Clone)]
pub struct Board {
    width: usize,
    height: usize,
    rows: Vec<Vec<Cell>>,
    // `None` until the row has been merged once, so the first refresh fetches everything.
    versions: Vec<Option<RowVersion>>,
    overlay: Vec<Option<u32>>,
}

impl Board {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            rows: vec![vec![Cell::default(); width]; height],
            versions: vec![None; height],
            overlay: vec![None; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    fn check(&self, x: usize, y: usize) -> Result<usize, BoardError> {
        if !self.contains(x, y) {
            return Err(BoardError::CellOutOfRange {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok(y * self.width + x)
    }

    pub fn cell(&self, x: usize, y: usize) -> Result<Cell, BoardError> {
        self.check(x, y)?;
        Ok(self.rows[y][x])
    }

    pub fn row(&self, y: usize) -> Option<&[Cell]> {
        self.rows.get(y).map(Vec::as_slice)
    }

    pub fn row_version(&self, y: usize) -> Option<RowVersion> {
        self.versions.get(y).copied().flatten()
    }

    /// Replace a row's confirmed cells and version. Leaves the board untouched on error.
    pub fn merge_row(
        &mut self,
        row: usize,
        version: RowVersion,
        cells: Vec<Cell>,
    ) -> Result<(), BoardError> {
        if row >= self.height {
            return Err(BoardError::RowOutOfRange {
                row,
                height: self.height,
            });
        }
        if cells.len() != self.width {
            return Err(BoardError::RowWidth {
                row,
                actual: cells.len(),
                width: self.width,
            });
        }
        self.rows[row] = cells;
        self.versions[row] = Some(version);
        Ok(())
    }

    pub fn overlay_color(&self, x: usize, y: usize) -> Option<u32> {
        let idx = self.check(x, y).ok()?;
        self.overlay[idx]
    }

    /// What the renderer shows: the pending color if there is one, else the confirmed one.
    pub fn display_color(&self, x: usize, y: usize) -> Result<u32, BoardError> {
        let idx = self.check(x, y)?;
        Ok(self.overlay[idx].unwrap_or(self.rows[y][x].color))
    }

    pub(crate) fn set_overlay(&mut self, x: usize, y: usize, color: u32) {
        if let Ok(idx) = self.check(x, y) {
            self.overlay[idx] = Some(color);
        }
    }

    pub(crate) fn clear_overlay(&mut self, x: usize, y: usize) {
        if let Ok(idx) = self.check(x, y) {
            self.overlay[idx] = None;
        }
    }

    pub fn overlay_len(&self) -> usize {
        self.overlay.iter().filter(|c| c.is_some()).count()
    }

    /// Rows whose remote version differs from the last merged one, ascending.
    /// Extra remote entries beyond the board height are ignored.
    pub fn stale_rows(&self, remote: &[RowVersion]) -> Vec<usize> {
        sync::stale_rows(&self.versions, remote)
    }

    pub fn versions(&self) -> &[Option<RowVersion>] {
        &self.versions
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.rows.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn row_of(width: usize, color: u32, owner: u32) -> Vec<Cell> {
        vec![Cell { color, owner }; width]
    }

    #[test]
    fn merge_row__replaces_cells_and_version() {
        // given
        let mut board = Board::new(3, 2);

        // when
        board
            .merge_row(1, RowVersion(4), row_of(3, 0xabcdef, 9))
            .unwrap();

        // then
        assert_eq!(
            board.cell(2, 1).unwrap(),
            Cell {
                color: 0xabcdef,
                owner: 9
            }
        );
        assert_eq!(board.row_version(1), Some(RowVersion(4)));
        assert_eq!(board.row_version(0), None);
    }

    #[test]
    fn merge_row__rejects_bad_index_or_width_without_changes() {
        // given
        let mut board = Board::new(3, 2);
        board.merge_row(0, RowVersion(1), row_of(3, 1, 1)).unwrap();

        // when
        let bad_index = board.merge_row(2, RowVersion(2), row_of(3, 2, 2));
        let bad_width = board.merge_row(0, RowVersion(2), row_of(2, 2, 2));

        // then
        assert_eq!(
            bad_index,
            Err(BoardError::RowOutOfRange { row: 2, height: 2 })
        );
        assert_eq!(
            bad_width,
            Err(BoardError::RowWidth {
                row: 0,
                actual: 2,
                width: 3
            })
        );
        assert_eq!(board.row(0).unwrap(), row_of(3, 1, 1).as_slice());
        assert_eq!(board.row_version(0), Some(RowVersion(1)));
    }

    #[test]
    fn display_color__prefers_overlay_over_confirmed() {
        // given
        let mut board = Board::new(2, 2);
        board.merge_row(0, RowVersion(1), row_of(2, 0x111111, 1)).unwrap();

        // when
        board.set_overlay(1, 0, 0x222222);

        // then
        assert_eq!(board.display_color(1, 0).unwrap(), 0x222222);
        assert_eq!(board.display_color(0, 0).unwrap(), 0x111111);
        assert_eq!(board.cell(1, 0).unwrap().color, 0x111111);
    }

    #[test]
    fn stale_rows__fresh_board_needs_every_row() {
        let board = Board::new(2, 3);
        let remote = vec![RowVersion(0); 3];
        assert_eq!(board.stale_rows(&remote), vec![0, 1, 2]);
    }

    #[test]
    fn stale_rows__only_reports_changed_versions() {
        // given
        let mut board = Board::new(1, 20);
        for row in 0..20 {
            board
                .merge_row(row, RowVersion(1), row_of(1, 0, 0))
                .unwrap();
        }
        let mut remote = vec![RowVersion(1); 20];
        remote[3] = RowVersion(2);
        remote[17] = RowVersion(5);

        // when
        let stale = board.stale_rows(&remote);

        // then
        assert_eq!(stale, vec![3, 17]);
    }

    #[test]
    fn cell__out_of_range_is_an_error() {
        let board = Board::new(2, 2);
        assert!(matches!(
            board.cell(2, 0),
            Err(BoardError::CellOutOfRange { x: 2, y: 0, .. })
        ));
    }
}
