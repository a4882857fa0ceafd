//! bcmhal entry point.
//!
//! Brings the hardware layer up against the in-memory SDK, applies a
//! software state, sweeps what the state does not claim and polls counters
//! until interrupted. On exit the SDK contents and the warm-boot state are
//! written to the warm-boot directory so the next run with `--warm-boot`
//! adopts them.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use bcm_hal::audit::{init_logging, init_logging_pretty};
use bcm_hal::{spawn_stat_poller, HalConfig, HwSwitch, SwitchState, SwitchStateConfig, WarmBootState};
use bcm_sdk::{FakeDump, FakeSdk};
use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

const SDK_DUMP_FILE: &str = "sdk_dump.json";

/// Bcm hardware layer agent
#[derive(Parser, Debug)]
#[command(name = "bcmhal")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Agent config (YAML, or JSON with a .json extension)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Software switch state (JSON) to program
    #[arg(short = 's', long)]
    state: Option<PathBuf>,

    /// Adopt the hardware and warm-boot state left by the previous run
    #[arg(long)]
    warm_boot: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    pretty: bool,

    /// Poll counters once and exit instead of running until interrupted
    #[arg(long)]
    poll_once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.pretty {
        init_logging_pretty(&args.log_level);
    } else {
        init_logging(&args.log_level);
    }
    if let Err(e) = color_eyre::install() {
        warn!("Failed to install error report hooks: {}", e);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("bcmhal failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => HalConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => HalConfig::default(),
    };
    let state = match &args.state {
        Some(path) => SwitchStateConfig::load(path)
            .and_then(SwitchStateConfig::into_state)
            .with_context(|| format!("loading state {}", path.display()))?,
        None => SwitchState::new(),
    };

    let (sdk, wb_state) = if args.warm_boot {
        let sdk = load_sdk(&config.warm_boot_dir)?;
        let wb_state = WarmBootState::load(config.warm_boot_state_file())
            .context("loading warm boot state")?;
        if wb_state.is_none() {
            warn!("No warm boot state found, adopting hardware without it");
        }
        (sdk, wb_state)
    } else {
        (Arc::new(FakeSdk::new()), None)
    };

    info!(
        "Starting bcmhal ({} boot, asic {:?})",
        if args.warm_boot { "warm" } else { "cold" },
        config.asic
    );
    let poll_interval = config.stat_poll_interval();
    let warm_boot_dir = config.warm_boot_dir.clone();
    let state_file = config.warm_boot_state_file();

    let mut hw = HwSwitch::init(sdk.clone(), config, wb_state).context("initializing switch")?;
    hw.state_changed(&state).context("applying initial state")?;
    let report = hw.finish_init();
    info!(
        "Init done: {} acls, {} teflows, {} mirrors, {} stale objects removed",
        hw.acl_table().len(),
        hw.teflow_table().len(),
        hw.mirror_table().len(),
        report.total()
    );

    let updater = hw.stat_updater().clone();
    if args.poll_once {
        let updated = tokio::task::spawn_blocking(move || updater.update_stats())
            .await
            .context("polling stats")?;
        info!("Polled {} counters", updated);
    } else {
        let cancel = CancellationToken::new();
        let poller = spawn_stat_poller(updater, poll_interval, cancel.clone());
        tokio::signal::ctrl_c()
            .await
            .context("waiting for ctrl-c")?;
        warn!("Received SIGINT, exiting for warm boot");
        cancel.cancel();
        if let Err(e) = poller.await {
            warn!("Stat poller ended abnormally: {}", e);
        }
    }

    let wb_state = hw.graceful_exit();
    fs::create_dir_all(&warm_boot_dir)
        .with_context(|| format!("creating {}", warm_boot_dir.display()))?;
    wb_state
        .save(&state_file)
        .with_context(|| format!("saving {}", state_file.display()))?;
    save_sdk(&sdk, &warm_boot_dir)?;
    info!("Warm boot state saved to {}", warm_boot_dir.display());
    Ok(())
}

fn load_sdk(dir: &Path) -> anyhow::Result<Arc<FakeSdk>> {
    let path = dir.join(SDK_DUMP_FILE);
    if !path.exists() {
        warn!("No hardware dump at {}, starting empty", path.display());
        return Ok(Arc::new(FakeSdk::new()));
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let dump: FakeDump =
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Arc::new(FakeSdk::from_dump(dump)))
}

fn save_sdk(sdk: &FakeSdk, dir: &Path) -> anyhow::Result<()> {
    let path = dir.join(SDK_DUMP_FILE);
    let content = serde_json::to_string_pretty(&sdk.dump())?;
    fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
