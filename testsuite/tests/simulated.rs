use expect_test::expect;
use proptest::prelude::*;
use testsuite::cli::Fpgad as _;
use testsuite::device::{FpgaDevice, OverlayRegistry};
use testsuite::log::init_tracing;
use testsuite::scenarios::fpgad_lifecycle;
use testsuite::simulator::SimulatedSystem;
use testsuite::suite::Suite;

fn system() -> SimulatedSystem {
    init_tracing();
    SimulatedSystem::new().unwrap()
}

fn device(system: &SimulatedSystem) -> FpgaDevice {
    FpgaDevice::new(&system.config().layout.device_dir)
}

#[test]
fn lifecycle_catalog_passes() {
    let system = system();
    let fpgad = system.fpgad();

    let report = Suite::new(system.config(), &fpgad, fpgad_lifecycle()).run();

    assert!(report.is_success(), "{report}");
    assert_eq!(report.passed(), fpgad_lifecycle().len());
}

#[test]
fn suite_leaves_the_baseline_behind() {
    let system = system();
    let fpgad = system.fpgad();

    Suite::new(system.config(), &fpgad, fpgad_lifecycle())
        .filter("overlay")
        .run();

    let registry = OverlayRegistry::new(&system.config().layout.overlay_dir);
    assert!(registry.entries().unwrap().is_empty());
    assert_eq!(device(&system).read_attribute("flags").unwrap(), "00000000");
}

#[test]
fn end_to_end_bitstream_then_status() {
    let system = system();
    let fpgad = system.fpgad();

    let load = fpgad
        .invoke(&["load", "bitstream", "./fpgad/k26-starter-kits/k26_starter_kits.bit.bin"])
        .unwrap();
    assert_eq!(load.exit_code, Some(0), "{load}");
    assert!(load.stdout.contains("loaded to fpga0 using firmware lookup path"));

    let status = fpgad.invoke(&["status"]).unwrap();
    assert_eq!(status.exit_code, Some(0), "{status}");
    assert!(status.stdout.contains("operating"));
}

#[test]
fn end_to_end_invalid_flags_block_the_load() {
    let system = system();
    let fpgad = system.fpgad();
    let device = device(&system);

    device.reset_flags(system.config().invalid_flags).unwrap();
    let state = device.read_attribute("state").unwrap();

    let load = fpgad
        .invoke(&["load", "bitstream", "./fpgad/k26-starter-kits/k26_starter_kits.bit.bin"])
        .unwrap();

    assert_eq!(load.exit_code, Some(1), "{load}");
    assert!(load.stderr.contains("FpgadError::IOWrite:"));
    assert_eq!(device.read_attribute("state").unwrap(), state);
    assert_eq!(device.read_attribute("flags").unwrap(), "000000DF");
}

#[test]
fn status_reports_device_and_overlay() {
    let system = system();
    let fpgad = system.fpgad();
    let config = system.config();

    std::fs::copy(
        config.absolute_fixture(&config.bitstream_file),
        config.absolute_fixture(&config.overlay_firmware_name),
    )
    .unwrap();

    let load = fpgad
        .invoke(&["load", "overlay", "./fpgad/k26-starter-kits/k26_starter_kits.dtbo"])
        .unwrap();
    assert!(load.success(), "{load}");

    let status = fpgad.invoke(&["status"]).unwrap();
    expect![[r#"
        ---- DEVICES ----
        | dev | platform | state |
        | fpga0 | universal | operating |

        ---- OVERLAYS ----
        | overlay | status |
        | fpga0 | "k26_starter_kits.dtbo" applied |
    "#]]
    .assert_eq(&status.stdout);
}

#[test]
fn overlay_handles_are_exclusive() {
    let system = system();
    let fpgad = system.fpgad();

    let overlay = "./fpgad/k26-starter-kits/k26_starter_kits.dtbo";
    assert!(!fpgad.invoke(&["load", "overlay", overlay]).unwrap().success());

    let again = fpgad.invoke(&["load", "overlay", overlay]).unwrap();
    assert!(!again.success());
    assert!(again.stderr.contains("FpgadError::Argument:"));

    let other = fpgad
        .invoke(&["load", "overlay", overlay, "--handle", "second"])
        .unwrap();
    assert!(other.stderr.contains("FpgadError::OverlayStatus:"));

    let removed = fpgad.invoke(&["remove", "overlay", "--handle", "fpga0"]).unwrap();
    assert!(removed.success(), "{removed}");
    assert!(removed.stdout.starts_with("fpga0 removed by deleting"));

    let registry = OverlayRegistry::new(&system.config().layout.overlay_dir);
    assert_eq!(registry.entries().unwrap(), ["second"]);

    assert!(fpgad.invoke(&["remove", "overlay"]).unwrap().success());
    assert!(registry.entries().unwrap().is_empty());

    let nothing_left = fpgad.invoke(&["remove", "overlay"]).unwrap();
    assert_eq!(nothing_left.exit_code, Some(1));
}

#[test]
fn command_line_surface() {
    let system = system();
    let fpgad = system.fpgad();

    let remove_bitstream = fpgad.invoke(&["remove", "bitstream"]).unwrap();
    assert_eq!(remove_bitstream.exit_code, Some(1));
    assert!(remove_bitstream.stderr.contains("Not implemented"));

    let unknown = fpgad.invoke(&["flash"]).unwrap();
    assert_eq!(unknown.exit_code, Some(2));
    assert!(unknown.stderr.contains("unrecognized subcommand 'flash'"));

    assert_eq!(fpgad.invoke(&[]).unwrap().exit_code, Some(2));
    assert_eq!(fpgad.invoke(&["help", "flash"]).unwrap().exit_code, Some(2));

    let help = fpgad.invoke(&["load", "overlay", "--help"]).unwrap();
    assert!(help.success());
    assert!(help.stdout.contains("Usage: fpgad load overlay"));

    let set_state = fpgad.invoke(&["set", "state", "operating"]).unwrap();
    assert!(set_state.stderr.contains("FpgadError::IOWrite:"));
    assert!(set_state.stderr.contains("permission denied"));

    let missing_attribute = fpgad.invoke(&["set", "firmware_name", "x"]).unwrap();
    assert_eq!(missing_attribute.exit_code, Some(1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn non_decimal_flags_never_change_the_device(value in "[0-9]{0,4}[a-zA-Z.+ ][0-9a-zA-Z.]{0,4}") {
        let system = system();
        let fpgad = system.fpgad();
        let device = device(&system);
        device.reset_flags(0x20).unwrap();

        let result = fpgad.invoke(&["set", "flags", &value]).unwrap();

        prop_assert!(!result.success());
        prop_assert!(result.stderr.contains("FpgadError::IOWrite:"));
        prop_assert_eq!(device.read_attribute("flags").unwrap(), "00000020");
    }

    #[test]
    fn decimal_flags_are_written_verbatim(value in 0u32..=0x3F) {
        let system = system();
        let fpgad = system.fpgad();
        let value = value.to_string();

        let result = fpgad.invoke(&["set", "flags", &value]).unwrap();

        prop_assert!(result.success());
        let expected = format!("{value} written to ");
        prop_assert!(result.stdout.starts_with(&expected));
        prop_assert_eq!(device(&system).read_attribute("flags").unwrap(), value);
    }
}
