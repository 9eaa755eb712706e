//! The client-side sync engine. One `Engine` owns the board, the edit queue and the
//! in-flight batch; remote calls run on spawned tasks and report back over a channel,
//! so every mutation happens on whichever task drives `next_event`/`handle`.

use crate::{
    accrual::BalanceEstimate,
    board::Board,
    config::EngineConfig,
    error::{
        LedgerError,
        RefreshError,
    },
    leaderboard::{
        LeaderEntry,
        Leaderboard,
    },
    ledger::{
        AccountInfo,
        Berry,
        Ledger,
    },
    queue::{
        Budget,
        EditQueue,
        OfferOutcome,
        PendingEdit,
    },
    submitter::{
        BatchSubmitter,
        FailureOutcome,
    },
    sync::{
        RowUpdate,
        fetch_stale_rows,
    },
    timer::Timer,
};
use chrono::{
    DateTime,
    Utc,
};
use futures::future::join_all;
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::Instant,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

const MAX_ERRORS: usize = 50;

type OwnerLookup = (u32, Result<Option<AccountInfo>, LedgerError>);

#[derive(Debug)]
pub enum EngineEvent {
    SubmissionFinished(Result<(), LedgerError>),
    RefreshFinished(Result<Vec<RowUpdate>, RefreshError>),
    AccountFetched(Result<AccountInfo, LedgerError>),
    PreferenceSelected(Berry, Result<(), LedgerError>),
    OwnersResolved(Vec<OwnerLookup>),
    FlushDue,
    PollDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayCell {
    pub color: u32,
    pub owner: u32,
    pub pending: bool,
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub width: usize,
    pub height: usize,
    /// Row-major, overlay applied.
    pub cells: Vec<DisplayCell>,
    pub queued: usize,
    pub in_flight: usize,
    pub account_id: String,
    pub account_index: Option<u32>,
    pub num_pixels: u32,
    pub farming_preference: Berry,
    pub avocado: Option<f64>,
    pub banana: Option<f64>,
    pub leaderboard: Vec<LeaderEntry>,
    pub polling: bool,
    pub visible: bool,
    pub status: String,
    pub errors: Vec<String>,
}

impl EngineSnapshot {
    pub fn cell(&self, x: usize, y: usize) -> Option<DisplayCell> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get(y * self.width + x).copied()
    }
}

pub struct Engine<L: Ledger> {
    ledger: Arc<L>,
    config: EngineConfig,
    account_id: String,
    board: Board,
    queue: EditQueue,
    submitter: BatchSubmitter,
    leaderboard: Leaderboard,
    account: Option<AccountInfo>,
    estimate: Option<BalanceEstimate>,
    debounce: Timer,
    poll: Timer,
    run_until: Instant,
    visible: bool,
    refresh_in_flight: bool,
    refresh_queued: bool,
    account_in_flight: bool,
    account_queued: bool,
    /// Edits confirmed since start. The account read in flight was issued after
    /// `account_read_covers` of them; `billed_edits` is what the last read reflects.
    confirmed_edits: u64,
    billed_edits: u64,
    account_read_covers: u64,
    status: String,
    errors: Vec<String>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl<L: Ledger> Engine<L> {
    pub fn new(ledger: Arc<L>, config: EngineConfig, account_id: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            ledger,
            board: Board::new(config.board_width, config.board_height),
            queue: EditQueue::new(),
            submitter: BatchSubmitter::new(config.batch_size, config.max_consecutive_failures),
            leaderboard: Leaderboard::new(),
            account: None,
            estimate: None,
            debounce: Timer::new(),
            poll: Timer::new(),
            run_until: Instant::now() + config.max_idle_run(),
            visible: true,
            refresh_in_flight: false,
            refresh_queued: false,
            account_in_flight: false,
            account_queued: false,
            confirmed_edits: 0,
            billed_edits: 0,
            account_read_covers: 0,
            status: String::from("Connecting..."),
            errors: Vec::new(),
            account_id: account_id.into(),
            config,
            events_tx,
            events_rx,
        }
    }

    /// Initial account read and full board load, then start polling. Failures here are
    /// returned since there is nothing to show yet.
    pub async fn bootstrap(&mut self) -> Result<(), RefreshError> {
        info!(account_id = %self.account_id, "bootstrapping engine");
        let account = self.ledger.account(self.account_id.clone()).await?;
        self.ingest_account(account);
        let updates = fetch_stale_rows(
            self.ledger.as_ref(),
            self.board.versions(),
            self.board.width(),
            self.config.rows_per_fetch,
        )
        .await?;
        self.apply_updates(updates);
        self.run_until = Instant::now() + self.config.max_idle_run();
        self.poll.arm(self.config.poll_interval());
        self.set_status("Ready");
        Ok(())
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> &[PendingEdit] {
        self.submitter.in_flight()
    }

    pub fn account(&self) -> Option<&AccountInfo> {
        self.account.as_ref()
    }

    pub fn leaderboard(&self) -> Vec<LeaderEntry> {
        self.leaderboard.entries()
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_armed()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_in_flight
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn displayed_balance(&self, now: DateTime<Utc>) -> Option<f64> {
        self.estimate.map(|estimate| estimate.avocado.balance_at(now))
    }

    pub fn balance_estimate(&self) -> Option<BalanceEstimate> {
        self.estimate
    }

    pub fn farming_preference(&self) -> Berry {
        self.account
            .as_ref()
            .map(|account| account.farming_preference)
            .unwrap_or_default()
    }

    /// Last read balance less the cost of edits confirmed after that read was issued.
    fn spendable_balance(&self) -> u128 {
        let balance = self
            .account
            .as_ref()
            .map(|account| account.avocado_balance)
            .unwrap_or(0);
        let unbilled = self.confirmed_edits.saturating_sub(self.billed_edits);
        balance.saturating_sub(u128::from(unbilled) * u128::from(self.config.pixel_cost))
    }

    /// Hidden clients keep their poll cadence but skip the fetches.
    pub fn set_visible(&mut self, visible: bool) {
        if self.visible != visible {
            debug!(visible, "visibility changed");
        }
        self.visible = visible;
    }

    /// A user edit request. Applied to the overlay immediately when accepted.
    pub fn offer(&mut self, x: usize, y: usize, color: u32) -> OfferOutcome {
        self.extend_run();
        let budget = Budget {
            confirmed_balance: self.spendable_balance(),
            pixel_cost: u128::from(self.config.pixel_cost),
            in_flight: self.submitter.in_flight().len(),
        };
        let outcome = self
            .queue
            .offer(&mut self.board, PendingEdit::new(x, y, color), budget);
        match outcome {
            OfferOutcome::Queued => self.evaluate_flush(),
            OfferOutcome::InsufficientBalance => {
                self.set_status("Not enough balance for more pixels");
                self.spawn_account_refresh();
            }
            OfferOutcome::Duplicate | OfferOutcome::OutOfBounds => {}
        }
        outcome
    }

    /// Switch which berry the account farms. The account is re-read once the ledger
    /// accepts the change.
    pub fn select_farming_preference(&mut self, berry: Berry) {
        info!(%berry, "selecting farming preference");
        self.set_status(format!("Switching farming to {berry}..."));
        let ledger = Arc::clone(&self.ledger);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = ledger.select_farming_preference(berry).await;
            let _ = events.send(EngineEvent::PreferenceSelected(berry, result));
        });
    }

    /// Wait for the next thing that needs handling: a remote call result or a timer.
    pub async fn next_event(&mut self) -> EngineEvent {
        tokio::select! {
            // The engine keeps a sender, so the channel never closes.
            Some(event) = self.events_rx.recv() => event,
            () = self.debounce.fired() => EngineEvent::FlushDue,
            () = self.poll.fired() => EngineEvent::PollDue,
        }
    }

    pub fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SubmissionFinished(result) => self.on_submission_finished(result),
            EngineEvent::RefreshFinished(result) => self.on_refresh_finished(result),
            EngineEvent::AccountFetched(result) => self.on_account_fetched(result),
            EngineEvent::PreferenceSelected(berry, result) => {
                self.on_preference_selected(berry, result)
            }
            EngineEvent::OwnersResolved(lookups) => self.on_owners_resolved(lookups),
            EngineEvent::FlushDue => self.on_flush_due(),
            EngineEvent::PollDue => self.on_poll_tick(false),
        }
    }

    pub async fn step(&mut self) {
        let event = self.next_event().await;
        self.handle(event);
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> EngineSnapshot {
        let width = self.board.width();
        let height = self.board.height();
        let mut cells = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let confirmed = self.board.cell(x, y).unwrap_or_default();
                let overlay = self.board.overlay_color(x, y);
                cells.push(DisplayCell {
                    color: overlay.unwrap_or(confirmed.color),
                    owner: confirmed.owner,
                    pending: overlay.is_some(),
                });
            }
        }
        EngineSnapshot {
            width,
            height,
            cells,
            queued: self.queue.len(),
            in_flight: self.submitter.in_flight().len(),
            account_id: self.account_id.clone(),
            account_index: self.account.as_ref().map(|a| a.account_index),
            num_pixels: self.account.as_ref().map(|a| a.num_pixels).unwrap_or(0),
            farming_preference: self.farming_preference(),
            avocado: self.estimate.map(|e| e.avocado.balance_at(now)),
            banana: self.estimate.map(|e| e.banana.balance_at(now)),
            leaderboard: self.leaderboard.entries(),
            polling: self.poll.is_armed(),
            visible: self.visible,
            status: self.status.clone(),
            errors: self.errors.clone(),
        }
    }

    fn extend_run(&mut self) {
        self.run_until = Instant::now() + self.config.max_idle_run();
        if !self.poll.is_armed() {
            info!("resuming board polling");
            self.poll.arm(self.config.poll_interval());
        }
    }

    fn evaluate_flush(&mut self) {
        if self.submitter.batch_ready(&self.queue) {
            self.start_batch();
        }
        self.rearm_debounce();
    }

    fn rearm_debounce(&mut self) {
        if self.queue.is_empty() {
            self.debounce.cancel();
        } else {
            self.debounce.arm(self.config.flush_debounce());
        }
    }

    fn on_flush_due(&mut self) {
        if self.submitter.is_idle() {
            self.start_batch();
        }
        self.rearm_debounce();
    }

    fn start_batch(&mut self) {
        let Some(batch) = self.submitter.begin(&mut self.queue) else {
            return;
        };
        self.debounce.cancel();
        self.set_status(format!("Submitting {} pixels...", batch.len()));
        let ledger = Arc::clone(&self.ledger);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = ledger.submit_edits(batch).await;
            let _ = events.send(EngineEvent::SubmissionFinished(result));
        });
    }

    fn on_submission_finished(&mut self, result: Result<(), LedgerError>) {
        match result {
            Ok(()) => {
                let confirmed = self.submitter.on_success(&self.queue, &mut self.board);
                self.confirmed_edits += confirmed as u64;
                info!(confirmed, "batch confirmed");
                self.set_status(format!("Confirmed {confirmed} pixels"));
                self.on_poll_tick(true);
            }
            Err(err) => match self.submitter.on_failure(&mut self.queue, &mut self.board) {
                FailureOutcome::Requeued { attempt } => {
                    self.push_error(format!("submission failed (attempt {attempt}): {err}"));
                }
                FailureOutcome::Dropped { edits } => {
                    self.push_error(format!(
                        "submission failed, dropped {edits} pending pixels: {err}"
                    ));
                }
            },
        }
        self.evaluate_flush();
    }

    fn on_poll_tick(&mut self, forced: bool) {
        self.poll.cancel();
        if Instant::now() < self.run_until {
            self.poll.arm(self.config.poll_interval());
        } else {
            info!("no recent edits, board polling paused");
        }
        if !self.visible && !forced {
            debug!("client hidden, skipping board refresh");
            return;
        }
        self.request_refresh();
        self.spawn_account_refresh();
    }

    fn request_refresh(&mut self) {
        if self.refresh_in_flight {
            self.refresh_queued = true;
            return;
        }
        self.refresh_in_flight = true;
        let ledger = Arc::clone(&self.ledger);
        let events = self.events_tx.clone();
        let known = self.board.versions().to_vec();
        let width = self.board.width();
        let rows_per_fetch = self.config.rows_per_fetch;
        tokio::spawn(async move {
            let result = fetch_stale_rows(ledger.as_ref(), &known, width, rows_per_fetch).await;
            let _ = events.send(EngineEvent::RefreshFinished(result));
        });
    }

    fn on_refresh_finished(&mut self, result: Result<Vec<RowUpdate>, RefreshError>) {
        self.refresh_in_flight = false;
        match result {
            Ok(updates) => self.apply_updates(updates),
            Err(err) => {
                error!(%err, "board refresh failed");
                self.push_error(format!("board refresh failed: {err}"));
            }
        }
        if self.refresh_queued {
            self.refresh_queued = false;
            self.request_refresh();
        }
    }

    fn apply_updates(&mut self, updates: Vec<RowUpdate>) {
        if updates.is_empty() {
            return;
        }
        let height = self.board.height();
        let width = self.board.width();
        let malformed = updates
            .iter()
            .find(|update| update.row >= height || update.cells.len() != width);
        debug_assert!(malformed.is_none(), "malformed row update: {malformed:?}");
        if let Some(bad) = malformed {
            error!(row = bad.row, cells = bad.cells.len(), "refresh produced a malformed row");
            return;
        }
        let rows = updates.len();
        for RowUpdate {
            row,
            version,
            cells,
        } in updates
        {
            if let Err(err) = self.board.merge_row(row, version, cells) {
                error!(%err, "row merge rejected");
            }
        }
        debug!(rows, "merged rows");
        let owners = self.leaderboard.update(&self.board);
        self.spawn_owner_lookups(owners);
    }

    fn spawn_owner_lookups(&mut self, owners: Vec<u32>) {
        if owners.is_empty() {
            return;
        }
        let ledger = Arc::clone(&self.ledger);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let lookups = join_all(owners.into_iter().map(|owner| {
                let ledger = Arc::clone(&ledger);
                async move { (owner, ledger.account_by_index(owner).await) }
            }))
            .await;
            let _ = events.send(EngineEvent::OwnersResolved(lookups));
        });
    }

    fn on_owners_resolved(&mut self, lookups: Vec<OwnerLookup>) {
        for (owner, result) in lookups {
            match result {
                Ok(Some(account)) => self.leaderboard.resolve(owner, account.account_id),
                Ok(None) => warn!(owner, "owner index not found on ledger"),
                Err(err) => warn!(owner, ?err, "owner lookup failed"),
            }
        }
    }

    fn spawn_account_refresh(&mut self) {
        if self.account_in_flight {
            self.account_queued = true;
            return;
        }
        self.account_in_flight = true;
        self.account_read_covers = self.confirmed_edits;
        let ledger = Arc::clone(&self.ledger);
        let events = self.events_tx.clone();
        let account_id = self.account_id.clone();
        tokio::spawn(async move {
            let result = ledger.account(account_id).await;
            let _ = events.send(EngineEvent::AccountFetched(result));
        });
    }

    fn on_account_fetched(&mut self, result: Result<AccountInfo, LedgerError>) {
        self.account_in_flight = false;
        match result {
            Ok(account) => {
                self.billed_edits = self.billed_edits.max(self.account_read_covers);
                self.ingest_account(account);
            }
            Err(err) => warn!(?err, "account refresh failed"),
        }
        if self.account_queued {
            self.account_queued = false;
            self.spawn_account_refresh();
        }
    }

    fn on_preference_selected(&mut self, berry: Berry, result: Result<(), LedgerError>) {
        match result {
            Ok(()) => {
                self.set_status(format!("Farming {berry}"));
                self.spawn_account_refresh();
            }
            Err(err) => self.push_error(format!("could not switch farming to {berry}: {err}")),
        }
    }

    fn ingest_account(&mut self, account: AccountInfo) {
        self.estimate = Some(BalanceEstimate::from_account(
            &account,
            u128::from(self.config.pixel_cost),
            self.config.reward_per_pixel_per_ms(),
            Utc::now(),
        ));
        self.account = Some(account);
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    fn push_error(&mut self, message: String) {
        warn!("{message}");
        self.errors.push(message);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }
}
