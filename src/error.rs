use thiserror::Error;

/// A fetched row payload did not have the fixed wire length.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("encoded row is {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },
}

/// Contract violation against the board dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("cell ({x}, {y}) is outside the {width}x{height} board")]
    CellOutOfRange {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },
    #[error("row {row} is outside a board of height {height}")]
    RowOutOfRange { row: usize, height: usize },
    #[error("row {row} has {actual} cells, board width is {width}")]
    RowWidth {
        row: usize,
        actual: usize,
        width: usize,
    },
}

/// Failure reported by (or while talking to) the remote ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger rejected the call: {0}")]
    Rejected(String),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// A board refresh cycle failed as a whole; nothing was merged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("row {row}: {source}")]
    Decode {
        row: usize,
        #[source]
        source: DecodeError,
    },
    #[error("ledger returned {actual} row versions, board height is {expected}")]
    VersionCount { expected: usize, actual: usize },
    #[error("requested {requested} rows, ledger returned {returned}")]
    RowCount { requested: usize, returned: usize },
}
