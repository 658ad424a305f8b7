//! Runs the fpgad lifecycle catalog against the installed daemon and the host's FPGA device.
//!
//! Scenarios share the host's only device, so they run one after the other from a plain `main`; libtest's
//! parallel runner is not used. Exits successfully without running anything when the device is absent.
//!
//! The first non-flag argument, if any, only selects scenarios whose name contains it. Ctrl-C stops the run after
//! the current scenario and still restores the device.

#![expect(clippy::print_stdout, reason = "the report is printed for the operator")]

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use testsuite::cli::FpgadCli;
use testsuite::config::HarnessConfig;
use testsuite::device::FpgaDevice;
use testsuite::log::init_tracing;
use testsuite::scenarios::fpgad_lifecycle;
use testsuite::suite::Suite;
use tracing::{info, warn};

static CANCELLED: AtomicBool = AtomicBool::new(false);

fn main() -> anyhow::Result<ExitCode> {
    init_tracing();

    let config = HarnessConfig::from_env().context("load harness configuration")?;

    let device = FpgaDevice::new(&config.layout.device_dir);
    if !device.exists() {
        warn!(device = %device.dir().display(), "FPGA device not present; skipping hardware scenarios");
        return Ok(ExitCode::SUCCESS);
    }

    info!(fpgad = %config.fpgad_bin.display(), work_dir = %config.work_dir.display(), "Running hardware scenarios");

    let fpgad = FpgadCli::new(&config);
    let mut suite = Suite::new(&config, &fpgad, fpgad_lifecycle()).cancel_on(&CANCELLED);

    if let Some(filter) = std::env::args().skip(1).find(|arg| !arg.starts_with('-')) {
        suite = suite.filter(filter);
    }

    // Filters meant for other test targets land here too; leave the device alone then.
    if suite.selected().next().is_none() {
        info!("No hardware scenario matches the filter");
        return Ok(ExitCode::SUCCESS);
    }

    ctrlc::set_handler(|| {
        warn!("Ctrl-C received, stopping after the current scenario");
        CANCELLED.store(true, Ordering::SeqCst);
    })
    .context("failed to set Ctrl-C handler")?;

    let report = suite.run();
    println!("{report}");

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
