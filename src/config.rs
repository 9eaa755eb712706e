use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_ACCOUNT_ID: &str = "alice.sim";
/// One pixel, in raw ledger units.
pub const DEFAULT_PIXEL_COST: u64 = 1_000_000_000_000_000_000;

/// Constants the engine is built around. Board dimensions are fixed for the lifetime
/// of a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub board_width: usize,
    pub board_height: usize,
    pub batch_size: usize,
    pub flush_debounce_ms: u64,
    pub poll_interval_ms: u64,
    /// Polling stops this long after the last local edit.
    pub max_idle_run_ms: u64,
    pub max_consecutive_failures: u32,
    pub rows_per_fetch: usize,
    pub pixel_cost: u64,
    /// Pixels paid out per day for each owned pixel (plus one).
    pub daily_reward_per_pixel: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            board_width: 50,
            board_height: 50,
            batch_size: 100,
            flush_debounce_ms: 500,
            poll_interval_ms: 1_000,
            max_idle_run_ms: 10 * 60 * 1_000,
            max_consecutive_failures: 3,
            rows_per_fetch: 10,
            pixel_cost: DEFAULT_PIXEL_COST,
            daily_reward_per_pixel: 1,
        }
    }
}

impl EngineConfig {
    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.flush_debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_idle_run(&self) -> Duration {
        Duration::from_millis(self.max_idle_run_ms)
    }

    pub fn reward_per_pixel_per_ms(&self) -> u128 {
        u128::from(self.pixel_cost) * u128::from(self.daily_reward_per_pixel)
            / (24 * 60 * 60 * 1_000)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("board_width", self.board_width as u64),
            ("board_height", self.board_height as u64),
            ("batch_size", self.batch_size as u64),
            ("rows_per_fetch", self.rows_per_fetch as u64),
            ("max_consecutive_failures", u64::from(self.max_consecutive_failures)),
            ("poll_interval_ms", self.poll_interval_ms),
            ("pixel_cost", self.pixel_cost),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(eyre!("{name} must be greater than zero"));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub starting_pixels: u64,
    pub latency_ms: u64,
    /// Probability in `[0, 1]` that any single ledger call fails.
    pub failure_rate: f64,
    pub painters: usize,
    pub painter_interval_ms: u64,
    pub initial_color: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            starting_pixels: 100,
            latency_ms: 400,
            failure_rate: 0.0,
            painters: 3,
            painter_interval_ms: 1_500,
            initial_color: 0xffffff,
        }
    }
}

impl SimulationConfig {
    pub fn painter_interval(&self) -> Duration {
        Duration::from_millis(self.painter_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(eyre!(
                "failure_rate must be within [0, 1], got {}",
                self.failure_rate
            ));
        }
        if self.initial_color > 0xffffff {
            return Err(eyre!("initial_color must be a 24-bit RGB value"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub account_id: String,
    pub engine: EngineConfig,
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            engine: EngineConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(raw).wrap_err("invalid configuration JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults when no path is given; `~` is expanded.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let Some(raw_path) = path else {
            return Ok(Self::default());
        };
        let path = resolve_path(raw_path);
        let raw = fs::read_to_string(&path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&raw).wrap_err_with(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            return Err(eyre!("account_id must not be empty"));
        }
        self.engine.validate()?;
        self.simulation.validate()
    }
}

pub fn resolve_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
