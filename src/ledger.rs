use crate::{
    board::RowVersion,
    error::LedgerError,
    queue::PendingEdit,
};
use std::fmt;

pub mod simulated;

pub use simulated::SimulatedLedger;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Berry {
    /// Spent on drawing.
    #[default]
    Avocado,
    Banana,
}

impl fmt::Display for Berry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Berry::Avocado => "avocado",
            Berry::Banana => "banana",
        };
        write!(f, "{name}")
    }
}

/// One account as read from the ledger. Balances are in raw ledger units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_id: String,
    pub account_index: u32,
    pub avocado_balance: u128,
    pub banana_balance: u128,
    pub num_pixels: u32,
    pub farming_preference: Berry,
}

/// The remote board contract, as seen by one signed-in account. Every call is a
/// potentially slow remote round trip; edits are applied atomically per call.
pub trait Ledger: Send + Sync + 'static {
    fn row_versions(
        &self,
    ) -> impl Future<Output = Result<Vec<RowVersion>, LedgerError>> + Send;

    /// Encoded rows, in the order requested.
    fn rows(
        &self,
        indices: Vec<usize>,
    ) -> impl Future<Output = Result<Vec<Vec<u8>>, LedgerError>> + Send;

    fn submit_edits(
        &self,
        edits: Vec<PendingEdit>,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn account(
        &self,
        account_id: String,
    ) -> impl Future<Output = Result<AccountInfo, LedgerError>> + Send;

    fn account_by_index(
        &self,
        index: u32,
    ) -> impl Future<Output = Result<Option<AccountInfo>, LedgerError>> + Send;

    /// Which berry the signed-in account farms from now on. Accrual up to the switch is
    /// credited to the previous choice.
    fn select_farming_preference(
        &self,
        berry: Berry,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;
}
