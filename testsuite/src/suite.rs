//! Sequential scenario runner.
//!
//! Every scenario shares the one FPGA device and the one overlay registry of the host, so scenarios run strictly
//! one after the other on the calling thread. Nothing here locks: a concurrent run would interfere no matter
//! what, and the runner simply never starts one.

use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::cli::{self, Fpgad, InvocationResult};
use crate::config::HarnessConfig;
use crate::device::{FpgaDevice, OverlayRegistry};
use crate::error::ScenarioError;
use crate::staging::{StageOutcome, StagedFiles, TestData};

pub type ScenarioFn = fn(&mut ScenarioContext<'_>) -> Result<(), ScenarioError>;

/// One state transition of fpgad and the checks around it.
#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub body: ScenarioFn,
}

impl Scenario {
    pub const fn new(name: &'static str, body: ScenarioFn) -> Self {
        Self { name, body }
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario").field("name", &self.name).finish_non_exhaustive()
    }
}

/// What a scenario body gets to work with.
pub struct ScenarioContext<'a> {
    config: &'a HarnessConfig,
    fpgad: &'a dyn Fpgad,
    device: &'a FpgaDevice,
}

impl ScenarioContext<'_> {
    pub fn config(&self) -> &HarnessConfig {
        self.config
    }

    pub fn device(&self) -> &FpgaDevice {
        self.device
    }

    pub fn run(&self, args: &[&str]) -> Result<InvocationResult, ScenarioError> {
        Ok(self.fpgad.invoke(args)?)
    }

    pub fn load_bitstream(&self, path: &Path) -> Result<InvocationResult, ScenarioError> {
        Ok(cli::load_bitstream(self.fpgad, &path.to_string_lossy())?)
    }

    pub fn load_overlay(&self, path: &Path) -> Result<InvocationResult, ScenarioError> {
        Ok(cli::load_overlay(self.fpgad, &path.to_string_lossy())?)
    }

    pub fn status(&self) -> Result<InvocationResult, ScenarioError> {
        Ok(cli::status(self.fpgad)?)
    }

    /// Writes the flags attribute directly, without going through fpgad.
    pub fn set_flags(&self, value: u32) -> Result<(), ScenarioError> {
        Ok(self.device.reset_flags(value)?)
    }

    pub fn attribute(&self, name: &str) -> Result<String, ScenarioError> {
        Ok(self.device.read_attribute(name)?)
    }

    /// Stages every file, failing if any source is missing.
    ///
    /// Whatever was staged is unstaged when the returned guard goes away, including on early return.
    pub fn stage(&self, files: impl IntoIterator<Item = TestData>) -> Result<StagedFiles, ScenarioError> {
        let mut staged = StagedFiles::new();

        for data in files {
            let TestData { source, target } = data.clone();

            if staged.stage(data)? == StageOutcome::SourceMissing {
                return Err(ScenarioError::MissingFixture {
                    source_path: source,
                    target,
                });
            }
        }

        Ok(staged)
    }
}

#[derive(Debug)]
pub enum Outcome {
    Passed,
    Failed(ScenarioError),
    Panicked(String),
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct SuiteReport {
    pub scenarios: Vec<ScenarioReport>,
    /// The run was stopped before every selected scenario ran.
    pub cancelled: bool,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.outcome.is_passed()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioReport> {
        self.scenarios.iter().filter(|s| !s.outcome.is_passed())
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures().next().is_none()
    }

    pub fn outcome_of(&self, name: &str) -> Option<&Outcome> {
        self.scenarios.iter().find(|s| s.name == name).map(|s| &s.outcome)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for scenario in &self.scenarios {
            let verdict = if scenario.outcome.is_passed() { "ok" } else { "FAILED" };
            writeln!(f, "scenario {} ... {verdict} ({:.2?})", scenario.name, scenario.elapsed)?;
        }

        for scenario in self.failures() {
            writeln!(f, "\n---- {} ----", scenario.name)?;
            match &scenario.outcome {
                Outcome::Failed(e) => writeln!(f, "{e}")?,
                Outcome::Panicked(message) => writeln!(f, "panicked: {message}")?,
                Outcome::Passed => {}
            }
        }

        let failed = self.scenarios.len() - self.passed();
        let verdict = if failed == 0 && !self.cancelled { "ok" } else { "FAILED" };
        write!(f, "\nsuite result: {verdict}. {} passed; {failed} failed", self.passed())?;

        if self.cancelled {
            write!(f, "; cancelled")?;
        }

        Ok(())
    }
}

/// Runs scenarios against one fpgad, resetting the shared state around each of them.
pub struct Suite<'a> {
    config: &'a HarnessConfig,
    fpgad: &'a dyn Fpgad,
    device: FpgaDevice,
    registry: OverlayRegistry,
    scenarios: Vec<Scenario>,
    filter: Option<String>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Suite<'a> {
    pub fn new(config: &'a HarnessConfig, fpgad: &'a dyn Fpgad, scenarios: Vec<Scenario>) -> Self {
        Self {
            config,
            fpgad,
            device: FpgaDevice::new(&config.layout.device_dir),
            registry: OverlayRegistry::new(&config.layout.overlay_dir),
            scenarios,
            filter: None,
            cancel: None,
        }
    }

    /// Only run scenarios whose name contains `filter`.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Stop before the next scenario once `cancel` is set. Teardown still runs.
    #[must_use]
    pub fn cancel_on(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Scenarios the filter lets through, in run order.
    pub fn selected(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios
            .iter()
            .filter(|s| self.filter.as_deref().is_none_or(|filter| s.name.contains(filter)))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|cancel| cancel.load(Ordering::SeqCst))
    }

    pub fn run(&self) -> SuiteReport {
        let _teardown = SuiteTeardown(self);
        let mut report = SuiteReport::default();

        for scenario in self.selected() {
            if self.is_cancelled() {
                warn!(next = scenario.name, "Suite cancelled; skipping remaining scenarios");
                report.cancelled = true;
                break;
            }

            report.scenarios.push(self.run_scenario(scenario));
        }

        report
    }

    fn run_scenario(&self, scenario: &Scenario) -> ScenarioReport {
        info!(scenario = scenario.name, "Running scenario");

        self.reset_shared_state();

        let mut ctx = ScenarioContext {
            config: self.config,
            fpgad: self.fpgad,
            device: &self.device,
        };

        let started = Instant::now();

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (scenario.body)(&mut ctx))) {
            Ok(Ok(())) => Outcome::Passed,
            Ok(Err(e)) => Outcome::Failed(e),
            Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
        };

        let elapsed = started.elapsed();

        match &outcome {
            Outcome::Passed => info!(scenario = scenario.name, ?elapsed, "Scenario passed"),
            Outcome::Failed(e) => error!(scenario = scenario.name, "Scenario failed\n{e}"),
            Outcome::Panicked(message) => error!(scenario = scenario.name, %message, "Scenario panicked"),
        }

        ScenarioReport {
            name: scenario.name,
            outcome,
            elapsed,
        }
    }

    /// Clears leftover overlays and puts the flags back to the baseline.
    ///
    /// Failures are logged and swallowed: the scenario that depends on the state will report them itself.
    fn reset_shared_state(&self) {
        self.clear_overlays();

        info!(flags = self.config.baseline_flags, "Resetting device flags");
        if let Err(e) = self.device.reset_flags(self.config.baseline_flags) {
            error!(error = %e, hint = e.hint(), "Failed to reset device flags");
        }
    }

    fn clear_overlays(&self) {
        let report = match self.registry.clear() {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, hint = e.hint(), "Failed to list applied overlays");
                return;
            }
        };

        if report.is_clean() || !self.config.remove_overlay_fallback {
            return;
        }

        for name in &report.left_behind {
            match cli::remove_overlay(self.fpgad, name) {
                Ok(result) if result.success() => info!(overlay = %name, "Overlay removed through fpgad"),
                Ok(result) => warn!(
                    overlay = %name,
                    stderr = %result.stderr.trim(),
                    "fpgad could not remove the overlay either"
                ),
                Err(e) => error!(overlay = %name, error = %e, "Failed to run fpgad to remove the overlay"),
            }
        }
    }

    /// Leaves the shared state in its baseline for whatever runs next on this host.
    pub fn teardown(&self) {
        info!("Tearing down suite");
        self.reset_shared_state();
    }
}

struct SuiteTeardown<'s, 'a>(&'s Suite<'a>);

impl Drop for SuiteTeardown<'_, '_> {
    fn drop(&mut self) {
        self.0.teardown();
    }
}

fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
