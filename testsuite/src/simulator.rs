//! In-process stand-in for the fpgad command line.
//!
//! Reproduces the observable behaviour of the daemon and of the kernel nodes it drives, on top of a sysfs-like
//! tree in a temporary directory. Lets the whole scenario catalog run on machines without an FPGA.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tempfile::TempDir;
use tracing::debug;

use crate::cli::{Fpgad, InvocationResult, command_line};
use crate::config::{HarnessConfig, SysfsLayout};
use crate::error::InvocationError;

/// Flag bits the simulated FPGA manager knows how to program with.
pub const ACCEPTED_FLAGS_MASK: u32 = 0x3F;

const PLATFORM: &str = "universal";

#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error("FpgadError::Flag: Failed to read flags: {0}")]
    Flag(String),
    #[error("FpgadError::OverlayStatus: Overlay was not applied: {0}")]
    OverlayStatus(String),
    #[error("FpgadError::Argument: {0}")]
    Argument(String),
    #[error("FpgadError::IORead: An IO error occurred when reading from {file:?}: {e}")]
    IoRead { file: PathBuf, e: io::Error },
    #[error("FpgadError::IOWrite: An IO error occurred when writing to {file:?}: {e}")]
    IoWrite { file: PathBuf, e: io::Error },
    #[error("FpgadError::IOCreate: An IO error occurred when creating {file:?}: {e}")]
    IoCreate { file: PathBuf, e: io::Error },
    #[error("FpgadError::IODelete: An IO error occurred when deleting {file:?}: {e}")]
    IoDelete { file: PathBuf, e: io::Error },
    #[error("{0}")]
    Failure(String),
}

struct Response {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl Response {
    fn ok(message: String) -> Self {
        Self {
            exit_code: 0,
            stdout: format!("{message}\n"),
            stderr: String::new(),
        }
    }

    fn daemon_error(e: &DaemonError) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: format!("Error: {e}\n"),
        }
    }

    fn usage_error(message: String) -> Self {
        Self {
            exit_code: 2,
            stdout: String::new(),
            stderr: format!("error: {message}\n\nFor more information, try '--help'.\n"),
        }
    }
}

fn read_trimmed(path: &Path) -> Result<String, DaemonError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_owned())
        .map_err(|e| DaemonError::IoRead {
            file: path.to_path_buf(),
            e,
        })
}

/// Writes an existing node, the way sysfs and configfs attributes are written.
fn write_node(path: &Path, contents: &str) -> Result<(), DaemonError> {
    use std::io::Write as _;

    std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .and_then(|mut file| file.write_all(contents.as_bytes()))
        .map_err(|e| DaemonError::IoWrite {
            file: path.to_path_buf(),
            e,
        })
}

fn write_file(path: &Path, contents: &str) -> Result<(), DaemonError> {
    std::fs::write(path, contents).map_err(|e| DaemonError::IoWrite {
        file: path.to_path_buf(),
        e,
    })
}

/// Only plain non-negative base-10 numbers are valid flags input.
pub fn is_decimal_flags(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) && value.parse::<u32>().is_ok()
}

/// Bitstream an overlay descriptor asks for, from its `firmware-name = "..."` property.
fn required_firmware(descriptor: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(descriptor);
    let (_, rest) = text.split_once("firmware-name")?;
    let (_, rest) = rest.split_once('"')?;
    let (name, _) = rest.split_once('"')?;

    (!name.is_empty()).then(|| name.to_owned())
}

/// Splits a firmware path into the lookup directory and the name relative to it.
fn firmware_pair(path: &Path) -> Result<(PathBuf, PathBuf), DaemonError> {
    match (path.parent(), path.file_name()) {
        (Some(prefix), Some(name)) => Ok((prefix.to_path_buf(), PathBuf::from(name))),
        _ => Err(DaemonError::Argument(format!(
            "Provided path {path:?} does not name a file inside a directory"
        ))),
    }
}

pub struct SimulatedFpgad {
    layout: SysfsLayout,
    work_dir: PathBuf,
    device_handle: String,
}

impl SimulatedFpgad {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            layout: config.layout.clone(),
            work_dir: config.work_dir.clone(),
            device_handle: config.device_handle.clone(),
        }
    }

    fn absolute(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    fn attribute(&self, name: &str) -> PathBuf {
        self.layout.device_dir.join(name)
    }

    fn flags(&self) -> Result<u32, DaemonError> {
        let raw = read_trimmed(&self.attribute("flags"))?;
        u32::from_str_radix(&raw, 16).map_err(|e| DaemonError::Flag(format!("'{raw}' is not a flags word: {e}")))
    }

    fn flags_accepted(&self) -> Result<bool, DaemonError> {
        Ok(self.flags()? & !ACCEPTED_FLAGS_MASK == 0)
    }

    fn mark_programmed(&self, firmware: &str) -> Result<(), DaemonError> {
        write_node(&self.attribute("firmware"), firmware)?;
        write_node(&self.attribute("state"), "operating")
    }

    fn execute(&self, args: &[&str]) -> Response {
        if args.iter().any(|arg| *arg == "--help" || *arg == "-h") {
            let path: Vec<&str> = args.iter().copied().filter(|arg| !arg.starts_with('-')).collect();
            return help(&path);
        }

        let result = match args {
            ["help", path @ ..] => return help(path),
            ["load", "bitstream", file] => self.load_bitstream(file),
            ["load", "overlay", file] => self.load_overlay(file, None),
            ["load", "overlay", file, "--handle", handle] | ["load", "overlay", "--handle", handle, file] => {
                self.load_overlay(file, Some(*handle))
            }
            ["remove", "overlay"] => self.remove_overlay(None),
            ["remove", "overlay", "--handle", handle] => self.remove_overlay(Some(*handle)),
            ["remove", "bitstream"] => Err(DaemonError::Failure("Not implemented".to_owned())),
            ["set", attribute, value] => self.set(attribute, value),
            ["status"] => self.status(),
            [] => return Response::usage_error("a subcommand is required".to_owned()),
            [verb, ..] if !is_known_verb(verb) => {
                return Response::usage_error(format!("unrecognized subcommand '{verb}'"));
            }
            _ => return Response::usage_error(format!("invalid arguments '{}'", args.join(" "))),
        };

        match result {
            Ok(message) => Response::ok(message),
            Err(e) => Response::daemon_error(&e),
        }
    }

    fn load_bitstream(&self, file: &str) -> Result<String, DaemonError> {
        let path = self.absolute(file);
        let (prefix, name) = firmware_pair(&path)?;
        write_file(&self.layout.firmware_search_path, &prefix.to_string_lossy())?;

        let firmware_node = self.attribute("firmware");
        let rejected = |e: io::Error| DaemonError::IoWrite {
            file: firmware_node.clone(),
            e,
        };

        if !self.flags_accepted()? {
            return Err(rejected(io::Error::new(
                io::ErrorKind::InvalidInput,
                "flags not supported by the FPGA manager",
            )));
        }

        let image = prefix.join(&name);
        let metadata = std::fs::metadata(&image).map_err(rejected)?;
        if metadata.is_dir() {
            return Err(rejected(io::Error::new(io::ErrorKind::IsADirectory, "Is a directory")));
        }

        self.mark_programmed(&name.to_string_lossy())?;

        Ok(format!(
            "{} loaded to {} using firmware lookup path: '{prefix:?}'",
            path.display(),
            self.device_handle
        ))
    }

    fn load_overlay(&self, file: &str, handle: Option<&str>) -> Result<String, DaemonError> {
        let handle = handle.unwrap_or(self.device_handle.as_str());
        let source = self.absolute(file);
        let overlay_fs_path = self.layout.overlay_dir.join(handle);

        if overlay_fs_path.exists() {
            return Err(DaemonError::Argument(format!(
                "Overlay with this handle already exists at {overlay_fs_path:?}. Remove the overlay and try again."
            )));
        }

        let (prefix, name) = firmware_pair(&source)?;
        write_file(&self.layout.firmware_search_path, &prefix.to_string_lossy())?;

        std::fs::create_dir(&overlay_fs_path).map_err(|e| DaemonError::IoCreate {
            file: overlay_fs_path.clone(),
            e,
        })?;

        self.configfs_apply(&prefix, &name, &overlay_fs_path)?;

        let applied_path = read_trimmed(&overlay_fs_path.join("path"))?;
        if !Path::new(&applied_path).ends_with(&name) || applied_path.is_empty() {
            return Err(DaemonError::OverlayStatus(format!(
                "When trying to apply overlay {name:?}, the resulting vfs path contained {applied_path:?}"
            )));
        }

        let status = read_trimmed(&overlay_fs_path.join("status"))?;
        if !status.contains("applied") || status.contains("unapplied") {
            return Err(DaemonError::OverlayStatus(format!(
                "After writing to configfs, overlay status does not show 'applied'. Instead it is '{status}'"
            )));
        }

        Ok(format!(
            "{} loaded via {overlay_fs_path:?} using firmware lookup path: '{prefix:?}'",
            source.display()
        ))
    }

    /// What the kernel does once an overlay directory is created and its descriptor named.
    fn configfs_apply(&self, prefix: &Path, name: &Path, overlay_fs_path: &Path) -> Result<(), DaemonError> {
        let path_node = overlay_fs_path.join("path");
        let status_node = overlay_fs_path.join("status");

        let descriptor = match std::fs::read(prefix.join(name)) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!(error = %e, "Overlay descriptor unreadable");
                write_file(&path_node, "")?;
                return write_file(&status_node, "unapplied");
            }
        };

        write_file(&path_node, &name.to_string_lossy())?;

        let firmware = required_firmware(&descriptor).filter(|firmware| prefix.join(firmware).is_file());
        let flags_accepted = self.flags_accepted()?;

        let status = match firmware {
            Some(firmware) if flags_accepted => {
                self.mark_programmed(&firmware)?;
                "applied"
            }
            _ => "error",
        };

        write_file(&status_node, status)
    }

    fn remove_overlay(&self, handle: Option<&str>) -> Result<String, DaemonError> {
        let handle = match handle {
            Some(handle) => handle.to_owned(),
            None => self
                .overlay_entries()?
                .into_iter()
                .next()
                .ok_or_else(|| DaemonError::Failure("Could not find an overlay to remove".to_owned()))?,
        };

        let overlay_fs_path = self.layout.overlay_dir.join(&handle);
        std::fs::remove_dir_all(&overlay_fs_path).map_err(|e| DaemonError::IoDelete {
            file: overlay_fs_path.clone(),
            e,
        })?;

        Ok(format!("{handle} removed by deleting {overlay_fs_path:?}"))
    }

    fn set(&self, attribute: &str, value: &str) -> Result<String, DaemonError> {
        let node = self.attribute(attribute);

        let refused = |e: io::Error| DaemonError::IoWrite { file: node.clone(), e };

        match attribute {
            "state" => return Err(refused(io::Error::from(io::ErrorKind::PermissionDenied))),
            "flags" if !is_decimal_flags(value) => {
                return Err(refused(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "flags must be a non-negative integer",
                )));
            }
            _ => {}
        }

        write_node(&node, value)?;

        Ok(format!("{value} written to {}", node.display()))
    }

    fn overlay_entries(&self) -> Result<Vec<String>, DaemonError> {
        let read_error = |e| DaemonError::IoRead {
            file: self.layout.overlay_dir.clone(),
            e,
        };

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.layout.overlay_dir).map_err(read_error)? {
            names.push(entry.map_err(read_error)?.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(names)
    }

    fn status(&self) -> Result<String, DaemonError> {
        let state = read_trimmed(&self.attribute("state"))?;

        let mut message = format!(
            "---- DEVICES ----\n| dev | platform | state |\n| {} | {PLATFORM} | {state} |\n",
            self.device_handle
        );

        match self.overlay_entries() {
            Ok(overlays) => {
                message.push_str("\n---- OVERLAYS ----\n| overlay | status |\n");
                for overlay in overlays {
                    let dir = self.layout.overlay_dir.join(&overlay);
                    let path = read_trimmed(&dir.join("path"))?;
                    let status = read_trimmed(&dir.join("status"))?;
                    message.push_str(&format!("| {overlay} | \"{path}\" {status} |\n"));
                }
            }
            Err(e) => {
                message.push_str("\n---- OVERLAYS NOT ACCESSIBLE ----\n\nerrors encountered:\n");
                message.push_str(&e.to_string());
            }
        }

        Ok(message.trim_end().to_owned())
    }
}

impl Fpgad for SimulatedFpgad {
    fn invoke(&self, args: &[&str]) -> Result<InvocationResult, InvocationError> {
        let command = command_line("fpgad", args);
        debug!(%command, "Simulating");

        let Response {
            exit_code,
            stdout,
            stderr,
        } = self.execute(args);

        Ok(InvocationResult {
            command,
            exit_code: Some(exit_code),
            stdout,
            stderr,
        })
    }
}

fn is_known_verb(verb: &str) -> bool {
    matches!(verb, "load" | "remove" | "set" | "status" | "help")
}

fn help(path: &[&str]) -> Response {
    let text = match path {
        [] => "Usage: fpgad [OPTIONS] <COMMAND>\n\n\
               Commands:\n  load    Load a bitstream or an overlay\n  remove  Remove a bitstream or an overlay\n  \
               set     Set an attribute of an FPGA device\n  status  Show the state of devices and overlays\n  \
               help    Print this message or the help of the given subcommand(s)\n\n\
               Options:\n      --handle <HANDLE>  Device handle, e.g. fpga0\n  -h, --help             Print help",
        ["load"] => "Load a bitstream or an overlay\n\nUsage: fpgad load <COMMAND>\n\n\
                     Commands:\n  overlay    Apply a device-tree overlay\n  bitstream  Program a bitstream",
        ["load", "bitstream"] => "Program a bitstream\n\nUsage: fpgad load bitstream <FILE>",
        ["load", "overlay"] => "Apply a device-tree overlay\n\nUsage: fpgad load overlay [OPTIONS] <FILE>\n\n\
                                Options:\n      --handle <HANDLE>  Overlay handle",
        ["remove"] => "Remove a bitstream or an overlay\n\nUsage: fpgad remove <COMMAND>\n\n\
                       Commands:\n  overlay    Remove an applied overlay\n  bitstream  Remove the loaded bitstream",
        ["remove", "overlay"] => "Remove an applied overlay\n\nUsage: fpgad remove overlay [OPTIONS]\n\n\
                                  Options:\n      --handle <HANDLE>  Overlay handle",
        ["remove", "bitstream"] => "Remove the loaded bitstream\n\nUsage: fpgad remove bitstream",
        ["set"] => "Set an attribute of an FPGA device\n\nUsage: fpgad set <ATTRIBUTE> <VALUE>",
        ["status"] => "Show the state of devices and overlays\n\nUsage: fpgad status",
        ["help"] => "Print this message or the help of the given subcommand(s)\n\nUsage: fpgad help [COMMAND]...",
        [.., unknown] => return Response::usage_error(format!("unrecognized subcommand '{unknown}'")),
    };

    Response::ok(text.to_owned())
}

/// A temporary sysfs-like tree, fixture files, and an fpgad simulator working on them.
pub struct SimulatedSystem {
    _root: TempDir,
    config: HarnessConfig,
}

impl SimulatedSystem {
    pub fn new() -> anyhow::Result<Self> {
        let root = tempfile::tempdir().context("create tempdir")?;
        let layout = SysfsLayout::under(root.path());
        let work_dir = root.path().join("work");

        let config = HarnessConfig::builder().work_dir(work_dir).layout(layout).build();
        let layout = &config.layout;

        for dir in [&layout.device_dir, &layout.overlay_dir, &layout.firmware_dir] {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }

        let search_path_dir = layout
            .firmware_search_path
            .parent()
            .context("firmware search path has no parent")?;
        std::fs::create_dir_all(search_path_dir).context("create firmware_class parameters")?;

        let nodes = [
            (layout.device_dir.join("state"), "unknown\n"),
            (layout.device_dir.join("flags"), "0\n"),
            (layout.device_dir.join("firmware"), ""),
            (layout.firmware_search_path.clone(), ""),
        ];
        for (path, contents) in nodes {
            std::fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        }

        let test_data = config.test_data_path();
        std::fs::create_dir_all(&test_data).context("create test data directory")?;

        let bitstream = test_data.join(&config.bitstream_file);
        std::fs::write(&bitstream, b"\xFF\xFF\xFF\xFF\xAA\x99\x55\x66")
            .with_context(|| format!("write {}", bitstream.display()))?;

        let overlay = test_data.join(&config.overlay_file);
        std::fs::write(&overlay, overlay_descriptor(&config.overlay_firmware_name))
            .with_context(|| format!("write {}", overlay.display()))?;

        Ok(Self { _root: root, config })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn fpgad(&self) -> SimulatedFpgad {
        SimulatedFpgad::new(&self.config)
    }
}

/// Source text of an overlay descriptor that programs `firmware`.
pub fn overlay_descriptor(firmware: &str) -> String {
    format!(
        "/dts-v1/;\n/plugin/;\n\n&fpga_full {{\n    firmware-name = \"{firmware}\";\n    resets = <&zynqmp_reset 116>;\n}};\n"
    )
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("0", true)]
    #[case("20", true)]
    #[case("4294967295", true)]
    #[case("4294967296", false)]
    #[case("zero", false)]
    #[case("0.2", false)]
    #[case("-1", false)]
    #[case("0x20", false)]
    #[case("", false)]
    fn decimal_flags(#[case] value: &str, #[case] accepted: bool) {
        assert_eq!(is_decimal_flags(value), accepted);
    }

    #[test]
    fn firmware_name_is_read_from_descriptor() {
        let descriptor = overlay_descriptor("k26-starter-kits.bit.bin");

        assert_eq!(
            required_firmware(descriptor.as_bytes()).as_deref(),
            Some("k26-starter-kits.bit.bin")
        );
        assert_eq!(required_firmware(b"/dts-v1/;\n/plugin/;\n"), None);
        assert_eq!(required_firmware(b"firmware-name = \"\";"), None);
    }

    #[test]
    fn firmware_pair_splits_lookup_path() {
        let (prefix, name) = firmware_pair(Path::new("/lib/firmware/xilinx/k26.bit.bin")).unwrap();

        assert_eq!(prefix, Path::new("/lib/firmware/xilinx"));
        assert_eq!(name, Path::new("k26.bit.bin"));
        assert!(firmware_pair(Path::new("/")).is_err());
    }
}
