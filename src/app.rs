use crate::{
    config::Config,
    engine::Engine,
    ledger::{
        Berry,
        Ledger,
        SimulatedLedger,
        simulated::run_painters,
    },
    queue::OfferOutcome,
    ui,
};
use chrono::Utc;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::time::{
    self,
    MissedTickBehavior,
};
use tracing::{
    debug,
    info,
    warn,
};

/// Keeps the accruing balance moving on screen between engine events.
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

pub async fn run_app(config: Config) -> Result<()> {
    let ledger = SimulatedLedger::new(&config.engine, &config.simulation, config.account_id.clone());
    let painters = tokio::spawn(run_painters(
        ledger.clone(),
        config.simulation.painters,
        config.simulation.painter_interval(),
    ));

    let mut engine = Engine::new(Arc::new(ledger), config.engine.clone(), config.account_id.clone());
    bootstrap(&mut engine, config.engine.max_consecutive_failures).await?;

    let mut ui_state = ui::UiState::new(config.engine.board_width, config.engine.board_height);
    let mut input_events = ui::input_event_stream();

    info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(&mut engine, &mut ui_state, &mut input_events).await;
    painters.abort();
    ui::terminal_exit()?;
    res
}

async fn bootstrap<L: Ledger>(engine: &mut Engine<L>, attempts: u32) -> Result<()> {
    let mut attempt = 1;
    loop {
        match engine.bootstrap().await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < attempts => {
                warn!(attempt, %err, "initial load failed, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err).wrap_err("initial board load failed"),
        }
    }
}

async fn run_loop<L: Ledger>(
    engine: &mut Engine<L>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    info!("Running app loop");
    let mut redraw = time::interval(REDRAW_INTERVAL);
    redraw.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = engine.next_event() => {
                engine.handle(event);
            }
            _ = redraw.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Paint { x, y, color } => {
                        let outcome = engine.offer(x, y, color);
                        if outcome != OfferOutcome::Queued {
                            debug!(x, y, ?outcome, "edit not queued");
                        }
                    }
                    ui::UserEvent::Visibility(visible) => engine.set_visible(visible),
                    ui::UserEvent::SwitchFarming => {
                        let berry = match engine.farming_preference() {
                            Berry::Avocado => Berry::Banana,
                            Berry::Banana => Berry::Avocado,
                        };
                        engine.select_farming_preference(berry);
                    }
                    ui::UserEvent::Redraw => {}
                }
            }
        }
        ui::draw(ui_state, &engine.snapshot(Utc::now())).wrap_err("draw failed")?;
    }
    info!(
        queued = engine.queued(),
        in_flight = engine.in_flight().len(),
        "shutting down"
    );
    Ok(())
}
