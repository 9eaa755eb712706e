//! Scriptable in-memory ledger for engine tests. Unlike the simulated ledger it has no
//! economics: submissions succeed unless a failure has been scripted, and every
//! call is recorded.

use crate::{
    board::{
        Cell,
        RowVersion,
    },
    codec::encode_row,
    config::EngineConfig,
    engine::Engine,
    error::LedgerError,
    ledger::{
        AccountInfo,
        Berry,
        Ledger,
    },
    queue::PendingEdit,
};
use std::{
    collections::{
        BTreeMap,
        BTreeSet,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};
use tokio::time;

pub const ALICE: &str = "alice.sim";
pub const ALICE_INDEX: u32 = 1;
pub const PIXEL_COST: u64 = 1_000;

#[derive(Debug)]
struct FakeState {
    width: usize,
    rows: Vec<Vec<Cell>>,
    versions: Vec<u64>,
    account: AccountInfo,
    owners: BTreeMap<u32, Result<Option<AccountInfo>, LedgerError>>,
    submit_results: VecDeque<Result<(), LedgerError>>,
    submissions: Vec<Vec<PendingEdit>>,
    row_requests: Vec<Vec<usize>>,
    version_reads: usize,
    account_reads: usize,
    corrupt_rows: BTreeSet<usize>,
    submits_in_flight: usize,
    max_submits_in_flight: usize,
}

#[derive(Debug)]
pub struct FakeLedger {
    state: Mutex<FakeState>,
    submit_latency: Duration,
    account_latency: Duration,
}

impl FakeLedger {
    /// A `width × height` board of white unowned cells and Alice with `pixels` worth of
    /// avocado.
    pub fn new(width: usize, height: usize, pixels: u64) -> Self {
        let account = AccountInfo {
            account_id: ALICE.to_string(),
            account_index: ALICE_INDEX,
            avocado_balance: u128::from(PIXEL_COST) * u128::from(pixels),
            banana_balance: 0,
            num_pixels: 0,
            farming_preference: Berry::Avocado,
        };
        let mut owners = BTreeMap::new();
        owners.insert(ALICE_INDEX, Ok(Some(account.clone())));
        Self {
            state: Mutex::new(FakeState {
                width,
                rows: vec![
                    vec![
                        Cell {
                            color: 0xffffff,
                            owner: 0,
                        };
                        width
                    ];
                    height
                ],
                versions: vec![0; height],
                account,
                owners,
                submit_results: VecDeque::new(),
                submissions: Vec::new(),
                row_requests: Vec::new(),
                version_reads: 0,
                account_reads: 0,
                corrupt_rows: BTreeSet::new(),
                submits_in_flight: 0,
                max_submits_in_flight: 0,
            }),
            submit_latency: Duration::ZERO,
            account_latency: Duration::ZERO,
        }
    }

    pub fn with_submit_latency(mut self, latency: Duration) -> Self {
        self.submit_latency = latency;
        self
    }

    /// Account reads answer after `latency`, with the state as of the answer.
    pub fn with_account_latency(mut self, latency: Duration) -> Self {
        self.account_latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake ledger state poisoned")
    }

    /// Results handed out to the next submissions, in order. Once used up, submissions
    /// succeed.
    pub fn script_submit_results(&self, results: impl IntoIterator<Item = Result<(), LedgerError>>) {
        self.state().submit_results.extend(results);
    }

    pub fn set_owner(&self, index: u32, lookup: Result<Option<AccountInfo>, LedgerError>) {
        self.state().owners.insert(index, lookup);
    }

    /// Serve a truncated payload for `row` from now on.
    pub fn corrupt_row(&self, row: usize) {
        self.state().corrupt_rows.insert(row);
    }

    pub fn heal_row(&self, row: usize) {
        self.state().corrupt_rows.remove(&row);
    }

    /// Paint as someone else, bumping the row version like a real commit.
    pub fn paint(&self, x: usize, y: usize, color: u32, owner: u32) {
        let mut state = self.state();
        state.rows[y][x] = Cell { color, owner };
        state.versions[y] += 1;
    }

    /// Credit Alice with `pixels` worth of avocado, as accrual would.
    pub fn grant(&self, pixels: u64) {
        let mut state = self.state();
        state.account.avocado_balance += u128::from(PIXEL_COST) * u128::from(pixels);
    }

    pub fn account_info(&self) -> AccountInfo {
        self.state().account.clone()
    }

    pub fn cell(&self, x: usize, y: usize) -> Cell {
        self.state().rows[y][x]
    }

    pub fn submissions(&self) -> Vec<Vec<PendingEdit>> {
        self.state().submissions.clone()
    }

    pub fn row_requests(&self) -> Vec<Vec<usize>> {
        self.state().row_requests.clone()
    }

    pub fn version_reads(&self) -> usize {
        self.state().version_reads
    }

    pub fn account_reads(&self) -> usize {
        self.state().account_reads
    }

    pub fn max_submits_in_flight(&self) -> usize {
        self.state().max_submits_in_flight
    }
}

impl Ledger for FakeLedger {
    async fn row_versions(&self) -> Result<Vec<RowVersion>, LedgerError> {
        let mut state = self.state();
        state.version_reads += 1;
        Ok(state.versions.iter().map(|&v| RowVersion(v)).collect())
    }

    async fn rows(&self, indices: Vec<usize>) -> Result<Vec<Vec<u8>>, LedgerError> {
        let mut state = self.state();
        state.row_requests.push(indices.clone());
        indices
            .into_iter()
            .map(|row| {
                let cells = state
                    .rows
                    .get(row)
                    .ok_or_else(|| LedgerError::NotFound(format!("row {row}")))?;
                let mut bytes = encode_row(cells);
                if state.corrupt_rows.contains(&row) {
                    bytes.pop();
                }
                Ok(bytes)
            })
            .collect()
    }

    async fn submit_edits(&self, edits: Vec<PendingEdit>) -> Result<(), LedgerError> {
        {
            let mut state = self.state();
            state.submissions.push(edits.clone());
            state.submits_in_flight += 1;
            state.max_submits_in_flight = state.max_submits_in_flight.max(state.submits_in_flight);
        }
        if !self.submit_latency.is_zero() {
            time::sleep(self.submit_latency).await;
        }
        let mut state = self.state();
        state.submits_in_flight -= 1;
        let result = state.submit_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            let owner = state.account.account_index;
            let width = state.width;
            let mut touched = BTreeSet::new();
            for edit in &edits {
                if edit.x < width && edit.y < state.rows.len() {
                    state.rows[edit.y][edit.x] = Cell {
                        color: edit.color,
                        owner,
                    };
                    touched.insert(edit.y);
                }
            }
            for row in touched {
                state.versions[row] += 1;
            }
            state.account.avocado_balance = state
                .account
                .avocado_balance
                .saturating_sub(u128::from(PIXEL_COST) * edits.len() as u128);
            state.account.num_pixels += edits.len() as u32;
        }
        result
    }

    async fn account(&self, account_id: String) -> Result<AccountInfo, LedgerError> {
        if !self.account_latency.is_zero() {
            time::sleep(self.account_latency).await;
        }
        let mut state = self.state();
        state.account_reads += 1;
        if account_id == state.account.account_id {
            Ok(state.account.clone())
        } else {
            Err(LedgerError::NotFound(account_id))
        }
    }

    async fn account_by_index(&self, index: u32) -> Result<Option<AccountInfo>, LedgerError> {
        self.state().owners.get(&index).cloned().unwrap_or(Ok(None))
    }

    async fn select_farming_preference(&self, berry: Berry) -> Result<(), LedgerError> {
        self.state().account.farming_preference = berry;
        Ok(())
    }
}

/// Engine settings sized for tests: small board, short timers.
pub fn test_config(width: usize, height: usize, batch_size: usize) -> EngineConfig {
    EngineConfig {
        board_width: width,
        board_height: height,
        batch_size,
        flush_debounce_ms: 500,
        poll_interval_ms: 1_000,
        max_idle_run_ms: 10_000,
        max_consecutive_failures: 3,
        rows_per_fetch: 10,
        pixel_cost: PIXEL_COST,
        daily_reward_per_pixel: 1,
    }
}

pub struct TestContext {
    pub ledger: Arc<FakeLedger>,
    pub engine: Engine<FakeLedger>,
}

impl TestContext {
    pub async fn new(ledger: FakeLedger, config: EngineConfig) -> Self {
        let ledger = Arc::new(ledger);
        let mut engine = Engine::new(Arc::clone(&ledger), config, ALICE);
        engine.bootstrap().await.unwrap();
        Self { ledger, engine }
    }

    /// Drive the engine until `done` holds. Panics after `max_steps` events so a stuck
    /// test fails instead of hanging.
    pub async fn settle(&mut self, max_steps: usize, done: impl Fn(&Engine<FakeLedger>, &FakeLedger) -> bool) {
        for _ in 0..max_steps {
            if done(&self.engine, &*self.ledger) {
                return;
            }
            self.engine.step().await;
        }
        assert!(
            done(&self.engine, &*self.ledger),
            "condition not reached after {max_steps} engine events"
        );
    }

    /// Handle every event that comes due within `duration` of paused time.
    pub async fn run_for(&mut self, duration: Duration) {
        let deadline = time::Instant::now() + duration;
        while let Ok(()) = time::timeout_at(deadline, self.engine.step()).await {}
    }
}
