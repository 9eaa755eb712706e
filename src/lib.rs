pub mod accrual;
pub mod app;
pub mod board;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod leaderboard;
pub mod ledger;
pub mod queue;
pub mod submitter;
pub mod sync;
pub mod test_helpers;
pub mod timer;
pub mod ui;

pub use engine::{
    Engine,
    EngineEvent,
    EngineSnapshot,
};
pub use ledger::{
    Ledger,
    SimulatedLedger,
};
