use crate::{
    board::{
        Cell,
        RowVersion,
    },
    codec::decode_row,
    error::RefreshError,
    ledger::Ledger,
};
use futures::future::try_join_all;
use tracing::debug;

/// A decoded row ready to be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub row: usize,
    pub version: RowVersion,
    pub cells: Vec<Cell>,
}

/// Indices whose remote token differs from the last merged one, ascending.
pub fn stale_rows(known: &[Option<RowVersion>], remote: &[RowVersion]) -> Vec<usize> {
    known
        .iter()
        .zip(remote)
        .enumerate()
        .filter(|(_, (known, current))| **known != Some(**current))
        .map(|(row, _)| row)
        .collect()
}

pub fn chunk_rows(rows: &[usize], rows_per_fetch: usize) -> Vec<Vec<usize>> {
    rows.chunks(rows_per_fetch.max(1)).map(<[usize]>::to_vec).collect()
}

/// One refresh cycle: read the version vector, fetch every stale row in concurrent
/// chunks and decode them all. Either every stale row comes back decoded or the cycle
/// fails, so callers never merge a partial refresh.
pub async fn fetch_stale_rows<L: Ledger>(
    ledger: &L,
    known: &[Option<RowVersion>],
    width: usize,
    rows_per_fetch: usize,
) -> Result<Vec<RowUpdate>, RefreshError> {
    let remote = ledger.row_versions().await?;
    if remote.len() != known.len() {
        return Err(RefreshError::VersionCount {
            expected: known.len(),
            actual: remote.len(),
        });
    }
    let stale = stale_rows(known, &remote);
    if stale.is_empty() {
        return Ok(Vec::new());
    }
    let chunks = chunk_rows(&stale, rows_per_fetch);
    debug!(rows = stale.len(), chunks = chunks.len(), "fetching stale rows");
    let payloads = try_join_all(chunks.iter().map(|chunk| ledger.rows(chunk.clone()))).await?;

    let mut updates = Vec::with_capacity(stale.len());
    for (chunk, encoded) in chunks.iter().zip(payloads) {
        if encoded.len() != chunk.len() {
            return Err(RefreshError::RowCount {
                requested: chunk.len(),
                returned: encoded.len(),
            });
        }
        for (&row, bytes) in chunk.iter().zip(encoded) {
            let cells =
                decode_row(&bytes, width).map_err(|source| RefreshError::Decode { row, source })?;
            updates.push(RowUpdate {
                row,
                version: remote[row],
                cells,
            });
        }
    }
    Ok(updates)
}
