//! In-process stand-in for the remote board contract. Keeps the contract's bookkeeping
//! (row versions, per-account charges, owner pixel counts, reward accrual) and adds
//! configurable latency and random call failures.

use super::{
    AccountInfo,
    Berry,
    Ledger,
};
use crate::{
    board::{
        Cell,
        RowVersion,
        UNOWNED,
    },
    codec::encode_row,
    config::{
        EngineConfig,
        SimulationConfig,
    },
    error::LedgerError,
    queue::PendingEdit,
};
use rand::Rng;
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};
use tokio::time::{
    self,
    Instant,
};
use tracing::{
    debug,
    info,
};

const MS_PER_DAY: u128 = 24 * 60 * 60 * 1000;
const MAX_COLOR: u32 = 0xff_ffff;

#[derive(Debug, Clone)]
struct Account {
    account_id: String,
    account_index: u32,
    balances: [u128; 2],
    num_pixels: u32,
    farming_preference: Berry,
    claimed_at: Instant,
}

impl Account {
    fn new(account_id: String, account_index: u32, balance: u128, now: Instant) -> Self {
        Self {
            account_id,
            account_index,
            balances: [balance, 0],
            num_pixels: 0,
            farming_preference: Berry::Avocado,
            claimed_at: now,
        }
    }

    /// Pay out rewards accrued since the last touch: one reward per owned pixel plus one.
    fn touch(&mut self, reward_per_pixel_per_ms: u128, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.claimed_at).as_millis();
        let reward = (u128::from(self.num_pixels) + 1)
            .saturating_mul(elapsed_ms)
            .saturating_mul(reward_per_pixel_per_ms);
        let slot = self.farming_preference as usize;
        self.balances[slot] = self.balances[slot].saturating_add(reward);
        self.claimed_at = now;
    }

    fn info(&self) -> AccountInfo {
        AccountInfo {
            account_id: self.account_id.clone(),
            account_index: self.account_index,
            avocado_balance: self.balances[Berry::Avocado as usize],
            banana_balance: self.balances[Berry::Banana as usize],
            num_pixels: self.num_pixels,
            farming_preference: self.farming_preference,
        }
    }
}

#[derive(Debug)]
struct ChainState {
    width: usize,
    height: usize,
    rows: Vec<Vec<Cell>>,
    versions: Vec<u64>,
    accounts: Vec<Account>,
    indices: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy)]
struct Economics {
    pixel_cost: u128,
    starting_balance: u128,
    reward_per_pixel_per_ms: u128,
}

/// A handle onto shared simulated chain state, signed in as one account.
#[derive(Debug, Clone)]
pub struct SimulatedLedger {
    state: Arc<Mutex<ChainState>>,
    signer: String,
    economics: Economics,
    latency: Duration,
    failure_rate: f64,
}

impl SimulatedLedger {
    pub fn new(engine: &EngineConfig, simulation: &SimulationConfig, signer: impl Into<String>) -> Self {
        let width = engine.board_width;
        let height = engine.board_height;
        let default_cell = Cell {
            color: simulation.initial_color & MAX_COLOR,
            owner: UNOWNED,
        };
        let pixel_cost = u128::from(engine.pixel_cost);
        let economics = Economics {
            pixel_cost,
            starting_balance: pixel_cost * u128::from(simulation.starting_pixels),
            reward_per_pixel_per_ms: pixel_cost * u128::from(engine.daily_reward_per_pixel)
                / MS_PER_DAY,
        };
        // Index 0 is the board itself and starts out owning every cell.
        let mut board_account = Account::new("board.sim".to_string(), 0, 0, Instant::now());
        board_account.num_pixels = (width * height) as u32;
        let mut indices = HashMap::new();
        indices.insert(board_account.account_id.clone(), 0);
        let state = ChainState {
            width,
            height,
            rows: vec![vec![default_cell; width]; height],
            versions: vec![0; height],
            accounts: vec![board_account],
            indices,
        };
        info!(width, height, "simulated ledger ready");
        Self {
            state: Arc::new(Mutex::new(state)),
            signer: signer.into(),
            economics,
            latency: Duration::from_millis(simulation.latency_ms),
            failure_rate: simulation.failure_rate.clamp(0.0, 1.0),
        }
    }

    /// Same chain, different signer.
    pub fn as_account(&self, signer: impl Into<String>) -> Self {
        Self {
            signer: signer.into(),
            ..self.clone()
        }
    }

    pub fn signer(&self) -> &str {
        &self.signer
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChainState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Unavailable("simulated chain state poisoned".to_string()))
    }

    // Rolled before any await so the thread-local rng never crosses a suspension point.
    fn roll_call(&self) -> (Duration, bool) {
        let mut rng = rand::rng();
        let jitter_ms = self.latency.as_millis() as u64 / 2;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.random_range(0..=jitter_ms))
        };
        let fail = self.failure_rate > 0.0 && rng.random_bool(self.failure_rate);
        (self.latency + jitter, fail)
    }

    async fn round_trip(&self, call: &'static str) -> Result<(), LedgerError> {
        let (delay, fail) = self.roll_call();
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        if fail {
            debug!(call, "simulated ledger call failed");
            return Err(LedgerError::Unavailable(format!("{call} timed out")));
        }
        Ok(())
    }

    fn apply_edits(&self, edits: &[PendingEdit]) -> Result<(), LedgerError> {
        let economics = self.economics;
        let now = Instant::now();
        let mut state = self.lock()?;
        for edit in edits {
            if edit.x >= state.width {
                return Err(LedgerError::Rejected("X is out of bounds".to_string()));
            }
            if edit.y >= state.height {
                return Err(LedgerError::Rejected("Y is out of bounds".to_string()));
            }
            if edit.color > MAX_COLOR {
                return Err(LedgerError::Rejected("Color is out of bounds".to_string()));
            }
        }

        let index = state.account_index_or_register(&self.signer, economics, now);
        let cost = economics.pixel_cost * edits.len() as u128;
        {
            let account = &mut state.accounts[index as usize];
            account.touch(economics.reward_per_pixel_per_ms, now);
            let balance = &mut account.balances[Berry::Avocado as usize];
            if *balance < cost {
                return Err(LedgerError::Rejected(
                    "Not enough balance to draw pixels".to_string(),
                ));
            }
            *balance -= cost;
        }

        let mut old_owners: BTreeMap<u32, u32> = BTreeMap::new();
        let mut touched_rows = Vec::new();
        for edit in edits {
            let cell = &mut state.rows[edit.y][edit.x];
            *old_owners.entry(cell.owner).or_default() += 1;
            *cell = Cell {
                color: edit.color,
                owner: index,
            };
            if !touched_rows.contains(&edit.y) {
                touched_rows.push(edit.y);
            }
        }
        for row in touched_rows {
            state.versions[row] += 1;
        }

        let replaced = old_owners.remove(&index).unwrap_or(0);
        let account = &mut state.accounts[index as usize];
        account.num_pixels = account.num_pixels + edits.len() as u32 - replaced;
        for (owner, pixels) in old_owners {
            if let Some(previous) = state.accounts.get_mut(owner as usize) {
                previous.touch(economics.reward_per_pixel_per_ms, now);
                previous.num_pixels = previous.num_pixels.saturating_sub(pixels);
            }
        }
        Ok(())
    }
}

impl ChainState {
    fn account_index_or_register(&mut self, account_id: &str, economics: Economics, now: Instant) -> u32 {
        if let Some(index) = self.indices.get(account_id) {
            return *index;
        }
        let index = self.accounts.len() as u32;
        self.accounts.push(Account::new(
            account_id.to_string(),
            index,
            economics.starting_balance,
            now,
        ));
        self.indices.insert(account_id.to_string(), index);
        info!(account_id, index, "registered account");
        index
    }
}

impl Ledger for SimulatedLedger {
    async fn row_versions(&self) -> Result<Vec<RowVersion>, LedgerError> {
        self.round_trip("row_versions").await?;
        let state = self.lock()?;
        Ok(state.versions.iter().copied().map(RowVersion).collect())
    }

    async fn rows(&self, indices: Vec<usize>) -> Result<Vec<Vec<u8>>, LedgerError> {
        self.round_trip("rows").await?;
        let state = self.lock()?;
        indices
            .into_iter()
            .map(|row| {
                state
                    .rows
                    .get(row)
                    .map(|cells| encode_row(cells))
                    .ok_or_else(|| LedgerError::Rejected(format!("row {row} out of bounds")))
            })
            .collect()
    }

    async fn submit_edits(&self, edits: Vec<PendingEdit>) -> Result<(), LedgerError> {
        self.round_trip("submit_edits").await?;
        self.apply_edits(&edits)
    }

    async fn account(&self, account_id: String) -> Result<AccountInfo, LedgerError> {
        self.round_trip("account").await?;
        let economics = self.economics;
        let now = Instant::now();
        let state = self.lock()?;
        // Unknown accounts read as a fresh, unsaved account with the starting balance.
        let mut account = match state.indices.get(&account_id) {
            Some(index) => state.accounts[*index as usize].clone(),
            None => Account::new(
                account_id,
                state.accounts.len() as u32,
                economics.starting_balance,
                now,
            ),
        };
        account.touch(economics.reward_per_pixel_per_ms, now);
        Ok(account.info())
    }

    async fn account_by_index(&self, index: u32) -> Result<Option<AccountInfo>, LedgerError> {
        self.round_trip("account_by_index").await?;
        let reward = self.economics.reward_per_pixel_per_ms;
        let now = Instant::now();
        let state = self.lock()?;
        Ok(state.accounts.get(index as usize).map(|account| {
            let mut account = account.clone();
            account.touch(reward, now);
            account.info()
        }))
    }

    async fn select_farming_preference(&self, berry: Berry) -> Result<(), LedgerError> {
        self.round_trip("select_farming_preference").await?;
        let economics = self.economics;
        let now = Instant::now();
        let mut state = self.lock()?;
        let index = state.account_index_or_register(&self.signer, economics, now);
        let account = &mut state.accounts[index as usize];
        account.touch(economics.reward_per_pixel_per_ms, now);
        account.farming_preference = berry;
        debug!(account_id = %self.signer, %berry, "farming preference selected");
        Ok(())
    }
}

/// Other accounts painting short random strokes, so there is remote activity to sync.
pub async fn run_painters(ledger: SimulatedLedger, painters: usize, interval: Duration) {
    if painters == 0 {
        return;
    }
    let (width, height) = match ledger.lock() {
        Ok(state) => (state.width, state.height),
        Err(_) => return,
    };
    let handles: Vec<SimulatedLedger> = (0..painters)
        .map(|n| ledger.as_account(format!("painter-{n}.sim")))
        .collect();
    let mut ticker = time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let (painter, stroke) = random_stroke(handles.len(), width, height);
        if let Err(err) = handles[painter].submit_edits(stroke).await {
            debug!(painter = handles[painter].signer(), ?err, "painter stroke failed");
        }
    }
}

fn random_stroke(painters: usize, width: usize, height: usize) -> (usize, Vec<PendingEdit>) {
    let mut rng = rand::rng();
    let painter = rng.random_range(0..painters);
    let color = rng.random_range(0..=MAX_COLOR);
    let y = rng.random_range(0..height);
    let len = rng.random_range(1..=5usize).min(width);
    let start = rng.random_range(0..=width - len);
    let stroke = (start..start + len)
        .map(|x| PendingEdit::new(x, y, color))
        .collect();
    (painter, stroke)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::codec::decode_row;

    fn ledger(width: usize, height: usize, starting_pixels: u64) -> SimulatedLedger {
        farming_ledger(width, height, starting_pixels, 0)
    }

    fn farming_ledger(
        width: usize,
        height: usize,
        starting_pixels: u64,
        daily_reward_per_pixel: u64,
    ) -> SimulatedLedger {
        let engine = EngineConfig {
            board_width: width,
            board_height: height,
            pixel_cost: 10,
            daily_reward_per_pixel,
            ..EngineConfig::default()
        };
        let simulation = SimulationConfig {
            starting_pixels,
            latency_ms: 0,
            failure_rate: 0.0,
            initial_color: 0xffffff,
            ..SimulationConfig::default()
        };
        SimulatedLedger::new(&engine, &simulation, "alice.sim")
    }

    #[tokio::test]
    async fn submit_edits__bumps_versions_of_touched_rows_only() {
        // given
        let ledger = ledger(3, 3, 100);

        // when
        ledger
            .submit_edits(vec![PendingEdit::new(0, 1, 0x10), PendingEdit::new(2, 1, 0x20)])
            .await
            .unwrap();

        // then
        let versions = ledger.row_versions().await.unwrap();
        assert_eq!(versions, vec![RowVersion(0), RowVersion(1), RowVersion(0)]);
        let rows = ledger.rows(vec![1]).await.unwrap();
        let cells = decode_row(&rows[0], 3).unwrap();
        assert_eq!(cells[0], Cell { color: 0x10, owner: 1 });
        assert_eq!(cells[1], Cell { color: 0xffffff, owner: 0 });
    }

    #[tokio::test]
    async fn submit_edits__charges_and_moves_pixel_counts() {
        // given
        let ledger = ledger(2, 2, 5);
        let bob = ledger.as_account("bob.sim");
        ledger
            .submit_edits(vec![PendingEdit::new(0, 0, 1), PendingEdit::new(1, 0, 1)])
            .await
            .unwrap();

        // when
        bob.submit_edits(vec![PendingEdit::new(0, 0, 2)]).await.unwrap();

        // then
        let alice = ledger.account("alice.sim".to_string()).await.unwrap();
        let bob = ledger.account_by_index(2).await.unwrap().unwrap();
        let board = ledger.account_by_index(0).await.unwrap().unwrap();
        assert_eq!(alice.avocado_balance, 30);
        assert_eq!(alice.num_pixels, 1);
        assert_eq!(bob.account_id, "bob.sim");
        assert_eq!(bob.num_pixels, 1);
        assert_eq!(board.num_pixels, 2);
    }

    #[tokio::test]
    async fn submit_edits__rejects_whole_batch_when_balance_short() {
        // given
        let ledger = ledger(3, 1, 2);

        // when
        let result = ledger
            .submit_edits(vec![
                PendingEdit::new(0, 0, 1),
                PendingEdit::new(1, 0, 1),
                PendingEdit::new(2, 0, 1),
            ])
            .await;

        // then
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
        assert_eq!(ledger.row_versions().await.unwrap(), vec![RowVersion(0)]);
    }

    #[tokio::test]
    async fn account__unknown_account_reads_with_starting_balance() {
        let ledger = ledger(1, 1, 7);
        let account = ledger.account("carol.sim".to_string()).await.unwrap();
        assert_eq!(account.avocado_balance, 70);
        assert_eq!(account.account_index, 1);
        assert_eq!(ledger.account_by_index(1).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn select_farming_preference__settles_old_berry_then_accrues_new_one() {
        // given
        let ledger = farming_ledger(1, 1, 1, 86_400_000);
        ledger.select_farming_preference(Berry::Avocado).await.unwrap();
        time::advance(Duration::from_millis(5)).await;

        // when
        ledger.select_farming_preference(Berry::Banana).await.unwrap();
        time::advance(Duration::from_millis(3)).await;

        // then
        let account = ledger.account("alice.sim".to_string()).await.unwrap();
        assert_eq!(account.farming_preference, Berry::Banana);
        assert_eq!(account.avocado_balance, 10 + 5 * 10);
        assert_eq!(account.banana_balance, 3 * 10);
    }

    #[tokio::test]
    async fn submit_edits__always_fails_at_full_failure_rate() {
        let ledger = ledger(1, 1, 7).with_failure_rate(1.0);
        let result = ledger.submit_edits(vec![PendingEdit::new(0, 0, 1)]).await;
        assert!(matches!(result, Err(LedgerError::Unavailable(_))));
    }
}
