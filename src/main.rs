use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use pixel_place::{
    app,
    config::{
        self,
        Config,
    },
};
use std::sync::OnceLock;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

const DEFAULT_LOG_DIR: &str = "~/.pixel-place/logs";

// Flushes buffered log lines on exit; must outlive the runtime.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: pixel-place [--config <path>] [--account <id>] [--failure-rate <0..1>]\n\
         [--latency-ms <ms>] [--painters <n>] [--log-dir <path>]\n\
         \n\
         Flags:\n\
           --config <path>        JSON config file (defaults built in)\n\
           --account <id>         Account to paint as (default {})\n\
           --failure-rate <p>     Probability that a simulated ledger call fails\n\
           --latency-ms <ms>      Base latency of simulated ledger calls\n\
           --painters <n>         Number of background painters\n\
           --log-dir <path>       Where log files go (default {})",
        config::DEFAULT_ACCOUNT_ID,
        DEFAULT_LOG_DIR,
    );
    std::process::exit(0);
}

struct CliArgs {
    config_path: Option<String>,
    account: Option<String>,
    failure_rate: Option<f64>,
    latency_ms: Option<u64>,
    painters: Option<usize>,
    log_dir: String,
}

fn parse_cli_args() -> Result<CliArgs> {
    fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
        args.next()
            .ok_or_else(|| eyre!("{flag} requires an argument"))
    }

    let mut args = std::env::args().skip(1);
    let mut cli = CliArgs {
        config_path: None,
        account: None,
        failure_rate: None,
        latency_ms: None,
        painters: None,
        log_dir: DEFAULT_LOG_DIR.to_string(),
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if cli.config_path.is_some() {
                    return Err(eyre!("--config may only be specified once"));
                }
                cli.config_path = Some(value(&mut args, "--config")?);
            }
            "--account" => cli.account = Some(value(&mut args, "--account")?),
            "--failure-rate" => {
                let raw = value(&mut args, "--failure-rate")?;
                cli.failure_rate = Some(
                    raw.parse()
                        .wrap_err_with(|| format!("invalid --failure-rate {raw}"))?,
                );
            }
            "--latency-ms" => {
                let raw = value(&mut args, "--latency-ms")?;
                cli.latency_ms = Some(
                    raw.parse()
                        .wrap_err_with(|| format!("invalid --latency-ms {raw}"))?,
                );
            }
            "--painters" => {
                let raw = value(&mut args, "--painters")?;
                cli.painters = Some(
                    raw.parse()
                        .wrap_err_with(|| format!("invalid --painters {raw}"))?,
                );
            }
            "--log-dir" => cli.log_dir = value(&mut args, "--log-dir")?,
            "--help" | "-h" => print_usage_and_exit(),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }
    Ok(cli)
}

fn load_config(cli: &CliArgs) -> Result<Config> {
    let mut config = Config::load(cli.config_path.as_deref())?;
    if let Some(account) = &cli.account {
        config.account_id = account.clone();
    }
    if let Some(failure_rate) = cli.failure_rate {
        config.simulation.failure_rate = failure_rate;
    }
    if let Some(latency_ms) = cli.latency_ms {
        config.simulation.latency_ms = latency_ms;
    }
    if let Some(painters) = cli.painters {
        config.simulation.painters = painters;
    }
    config.validate()?;
    Ok(config)
}

// The TUI owns the terminal, so logs go to a daily rolling file.
fn init_tracing(log_dir: &str) -> Result<()> {
    let dir = config::resolve_path(log_dir);
    std::fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("failed to create log dir {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, "pixel-place.log"));
    let _ = LOG_GUARD.set(guard);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = parse_cli_args()?;
    init_tracing(&cli.log_dir)?;
    let config = load_config(&cli)?;
    tracing::info!(account_id = %config.account_id, "starting pixel-place client");
    app::run_app(config).await
}
