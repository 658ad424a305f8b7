use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use typed_builder::TypedBuilder;

/// Flags value written to the device before every scenario.
pub const BASELINE_FLAGS: u32 = 0;

/// A flags word the FPGA manager refuses to program with.
pub const INVALID_FLAGS: u32 = 223;

/// Locations of the shared kernel-owned state the harness touches.
#[derive(Debug, Clone)]
pub struct SysfsLayout {
    /// Attribute directory of the singleton FPGA manager device.
    pub device_dir: PathBuf,
    /// configfs directory holding one subdirectory per applied overlay.
    pub overlay_dir: PathBuf,
    /// Global firmware directory searched by the daemon.
    pub firmware_dir: PathBuf,
    /// Kernel parameter holding the custom firmware search path.
    pub firmware_search_path: PathBuf,
}

impl SysfsLayout {
    pub fn system() -> Self {
        Self::under("/")
    }

    /// Same layout, re-rooted below `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();

        Self {
            device_dir: root.join("sys/class/fpga_manager/fpga0"),
            overlay_dir: root.join("sys/kernel/config/device-tree/overlays"),
            firmware_dir: root.join("lib/firmware"),
            firmware_search_path: root.join("sys/module/firmware_class/parameters/path"),
        }
    }
}

impl Default for SysfsLayout {
    fn default() -> Self {
        Self::system()
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct HarnessConfig {
    #[builder(default = PathBuf::from("fpgad"), setter(into))]
    pub fpgad_bin: PathBuf,
    /// Working directory of the spawned CLI; relative fixture paths are relative to it.
    #[builder(setter(into))]
    pub work_dir: PathBuf,
    #[builder(default)]
    pub layout: SysfsLayout,
    #[builder(default = "fpga0".to_owned(), setter(into))]
    pub device_handle: String,
    #[builder(default = PathBuf::from("fpgad/k26-starter-kits"), setter(into))]
    pub test_data_dir: PathBuf,
    #[builder(default = "k26_starter_kits.bit.bin".to_owned(), setter(into))]
    pub bitstream_file: String,
    #[builder(default = "k26_starter_kits.dtbo".to_owned(), setter(into))]
    pub overlay_file: String,
    /// Bitstream name referenced from inside the overlay descriptor.
    #[builder(default = "k26-starter-kits.bit.bin".to_owned(), setter(into))]
    pub overlay_firmware_name: String,
    /// Name the overlay is copied under when staged into a firmware directory.
    #[builder(default = "k26-starter-kits.dtbo".to_owned(), setter(into))]
    pub staged_overlay_name: String,
    #[builder(default = PathBuf::from("xilinx/k26_starter_kits"), setter(into))]
    pub vendor_subdir: PathBuf,
    #[builder(default = BASELINE_FLAGS)]
    pub baseline_flags: u32,
    #[builder(default = INVALID_FLAGS)]
    pub invalid_flags: u32,
    /// Fall back to `remove overlay --handle <name>` for registry entries rmdir could not delete.
    #[builder(default = true)]
    pub remove_overlay_fallback: bool,
    #[builder(default, setter(into))]
    pub timeout: Option<Duration>,
}

impl HarnessConfig {
    /// Builds the configuration for a real system, honouring the `FPGAD_*` environment overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        let work_dir = match std::env::var_os("FPGAD_TESTSUITE_WORK_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().context("resolve current directory")?,
        };

        let layout = match std::env::var_os("FPGAD_TESTSUITE_SYSROOT") {
            Some(root) => SysfsLayout::under(root),
            None => SysfsLayout::system(),
        };

        let fpgad_bin = std::env::var_os("FPGAD_BIN").map_or_else(|| PathBuf::from("fpgad"), PathBuf::from);

        let timeout = match std::env::var("FPGAD_TESTSUITE_TIMEOUT_SECS") {
            Ok(secs) => {
                let secs = secs
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("invalid FPGAD_TESTSUITE_TIMEOUT_SECS value: {secs:?}"))?;
                Some(Duration::from_secs(secs))
            }
            Err(std::env::VarError::NotPresent) => None,
            Err(e) => return Err(e).context("read FPGAD_TESTSUITE_TIMEOUT_SECS"),
        };

        Ok(Self::builder()
            .fpgad_bin(fpgad_bin)
            .work_dir(work_dir)
            .layout(layout)
            .timeout(timeout)
            .build())
    }

    /// `./<test data dir>/<file>`, as typed on a command line.
    pub fn relative_fixture(&self, file: &str) -> PathBuf {
        Path::new(".").join(&self.test_data_dir).join(file)
    }

    /// `<work dir>/<test data dir>/<file>`.
    pub fn absolute_fixture(&self, file: &str) -> PathBuf {
        self.work_dir.join(&self.test_data_dir).join(file)
    }

    pub fn test_data_path(&self) -> PathBuf {
        self.work_dir.join(&self.test_data_dir)
    }

    pub fn firmware_target(&self, file: &str) -> PathBuf {
        self.layout.firmware_dir.join(file)
    }

    pub fn vendor_firmware_target(&self, file: &str) -> PathBuf {
        self.layout.firmware_dir.join(&self.vendor_subdir).join(file)
    }
}
