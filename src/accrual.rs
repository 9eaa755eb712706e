use crate::ledger::{
    AccountInfo,
    Berry,
};
use chrono::{
    DateTime,
    Utc,
};

const NANOS_PER_MS: f64 = 1_000_000.0;

/// Linear extrapolation of a balance between account reads. Display only: queueing
/// decisions use the confirmed balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccrualEstimator {
    balance: f64,
    rate_per_ms: f64,
    sampled_at: DateTime<Utc>,
}

impl AccrualEstimator {
    pub fn new(balance: f64, rate_per_ms: f64, sampled_at: DateTime<Utc>) -> Self {
        Self {
            balance,
            rate_per_ms,
            sampled_at,
        }
    }

    pub fn balance_at(&self, t: DateTime<Utc>) -> f64 {
        let elapsed = t.signed_duration_since(self.sampled_at);
        let elapsed_ms = match elapsed.num_nanoseconds() {
            Some(nanos) => nanos as f64 / NANOS_PER_MS,
            None => elapsed.num_milliseconds() as f64,
        };
        self.balance + elapsed_ms * self.rate_per_ms
    }

    pub fn rate_per_ms(&self) -> f64 {
        self.rate_per_ms
    }

    pub fn sampled_at(&self) -> DateTime<Utc> {
        self.sampled_at
    }
}

/// Both berry balances of one account read, in pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceEstimate {
    pub avocado: AccrualEstimator,
    pub banana: AccrualEstimator,
}

impl BalanceEstimate {
    /// Only the preferred berry accrues, at `(num_pixels + 1) × reward` per millisecond.
    pub fn from_account(
        account: &AccountInfo,
        pixel_cost: u128,
        reward_per_pixel_per_ms: u128,
        sampled_at: DateTime<Utc>,
    ) -> Self {
        let cost = pixel_cost.max(1) as f64;
        let rate = (u128::from(account.num_pixels) + 1) as f64 * reward_per_pixel_per_ms as f64
            / cost;
        let (avocado_rate, banana_rate) = match account.farming_preference {
            Berry::Avocado => (rate, 0.0),
            Berry::Banana => (0.0, rate),
        };
        Self {
            avocado: AccrualEstimator::new(
                account.avocado_balance as f64 / cost,
                avocado_rate,
                sampled_at,
            ),
            banana: AccrualEstimator::new(
                account.banana_balance as f64 / cost,
                banana_rate,
                sampled_at,
            ),
        }
    }
}
