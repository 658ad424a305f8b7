//! The fpgad lifecycle catalog: one scenario per CLI transition.

use std::path::PathBuf;

use crate::assertions::{
    attribute_contains, attribute_unchanged, error_contains, failed, failed_with, output_contains, output_lacks,
    succeeded, succeeded_with,
};
use crate::error::ScenarioError;
use crate::staging::TestData;
use crate::suite::{Scenario, ScenarioContext};

const LOADED_BITSTREAM: &str = "loaded to fpga0 using firmware lookup path";
const LOADED_OVERLAY: &str = "loaded via";
const IO_WRITE_TAG: &str = "FpgadError::IOWrite:";
const OVERLAY_STATUS_TAG: &str = "FpgadError::OverlayStatus:";

type ScenarioResult = Result<(), ScenarioError>;

pub fn fpgad_lifecycle() -> Vec<Scenario> {
    vec![
        Scenario::new("load_bitstream_local", load_bitstream_local),
        Scenario::new("load_bitstream_home_fullpath", load_bitstream_home_fullpath),
        Scenario::new("load_bitstream_lib_firmware", load_bitstream_lib_firmware),
        Scenario::new("load_bitstream_lib_firmware_xilinx", load_bitstream_lib_firmware_xilinx),
        Scenario::new("load_bitstream_path_not_exist", load_bitstream_path_not_exist),
        Scenario::new("load_bitstream_containing_dir", load_bitstream_containing_dir),
        Scenario::new("load_bitstream_bad_flags", load_bitstream_bad_flags),
        Scenario::new("load_overlay_local", load_overlay_local),
        Scenario::new("load_overlay_lib_firmware", load_overlay_lib_firmware),
        Scenario::new("load_overlay_lib_firmware_xilinx", load_overlay_lib_firmware_xilinx),
        Scenario::new("load_overlay_full_path", load_overlay_full_path),
        Scenario::new("load_overlay_bad_path", load_overlay_bad_path),
        Scenario::new("load_overlay_missing_bitstream", load_overlay_missing_bitstream),
        Scenario::new("load_overlay_bad_flags", load_overlay_bad_flags),
        Scenario::new("status_executes", status_executes),
        Scenario::new("status_with_bitstream", status_with_bitstream),
        Scenario::new("status_with_overlay", status_with_overlay),
        Scenario::new("status_failed_overlay", status_failed_overlay),
        Scenario::new("set_flags_nonzero", set_flags_nonzero),
        Scenario::new("set_flags_string", set_flags_string),
        Scenario::new("set_state", set_state),
        Scenario::new("set_flags_float", set_flags_float),
        Scenario::new("set_flags_zero", set_flags_zero),
        Scenario::new("set_flags_idempotent", set_flags_idempotent),
        Scenario::new("help_main", help_main),
        Scenario::new("help_main_as_flag", help_main_as_flag),
        Scenario::new("help_set", help_set),
        Scenario::new("help_remove", help_remove),
        Scenario::new("help_remove_overlay", help_remove_overlay),
        Scenario::new("help_remove_bitstream", help_remove_bitstream),
        Scenario::new("help_load", help_load),
        Scenario::new("help_load_bitstream", help_load_bitstream),
        Scenario::new("help_load_overlay", help_load_overlay),
    ]
}

fn relative_bitstream(ctx: &ScenarioContext<'_>) -> PathBuf {
    ctx.config().relative_fixture(&ctx.config().bitstream_file)
}

fn absolute_bitstream(ctx: &ScenarioContext<'_>) -> PathBuf {
    ctx.config().absolute_fixture(&ctx.config().bitstream_file)
}

/// The shipped overlay names its bitstream differently from the shipped file, so a copy under the expected name
/// is put next to the overlay.
fn expected_bitstream_beside_overlay(ctx: &ScenarioContext<'_>) -> TestData {
    let config = ctx.config();
    TestData::new(
        absolute_bitstream(ctx),
        config.absolute_fixture(&config.overlay_firmware_name),
    )
}

// -- load bitstream -- //

fn load_bitstream_local(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let result = ctx.load_bitstream(&relative_bitstream(ctx))?;
    succeeded(&result)?;
    output_contains(&result, LOADED_BITSTREAM)?;
    Ok(())
}

fn load_bitstream_home_fullpath(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let result = ctx.load_bitstream(&absolute_bitstream(ctx))?;
    succeeded(&result)?;
    output_contains(&result, LOADED_BITSTREAM)?;
    Ok(())
}

fn load_bitstream_lib_firmware(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let target = ctx.config().firmware_target(&ctx.config().overlay_firmware_name);
    let staged = ctx.stage([TestData::new(absolute_bitstream(ctx), &target)])?;

    let result = ctx.load_bitstream(&target)?;
    staged.release();

    succeeded(&result)?;
    output_contains(&result, LOADED_BITSTREAM)?;
    Ok(())
}

fn load_bitstream_lib_firmware_xilinx(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let target = ctx.config().vendor_firmware_target(&ctx.config().overlay_firmware_name);
    let staged = ctx.stage([TestData::new(absolute_bitstream(ctx), &target)])?;

    let result = ctx.load_bitstream(&target)?;
    staged.release();

    succeeded(&result)?;
    output_contains(&result, LOADED_BITSTREAM)?;
    Ok(())
}

fn load_bitstream_path_not_exist(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let state = ctx.attribute("state")?;

    let result = ctx.run(&["load", "bitstream", "/this/path/is/fake.bit.bin"])?;
    failed(&result)?;
    error_contains(&result, IO_WRITE_TAG)?;

    attribute_unchanged(ctx.device(), "state", &state)
}

fn load_bitstream_containing_dir(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let state = ctx.attribute("state")?;
    let dir = format!("{}/", ctx.config().test_data_path().display());

    let result = ctx.run(&["load", "bitstream", &dir])?;
    failed(&result)?;
    error_contains(&result, IO_WRITE_TAG)?;

    attribute_unchanged(ctx.device(), "state", &state)
}

fn load_bitstream_bad_flags(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    ctx.set_flags(ctx.config().invalid_flags)?;
    let flags = ctx.attribute("flags")?;
    let state = ctx.attribute("state")?;

    let result = ctx.load_bitstream(&absolute_bitstream(ctx))?;
    failed(&result)?;
    error_contains(&result, IO_WRITE_TAG)?;

    attribute_unchanged(ctx.device(), "flags", &flags)?;
    attribute_unchanged(ctx.device(), "state", &state)
}

// -- load overlay -- //

fn load_overlay_local(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let staged = ctx.stage([expected_bitstream_beside_overlay(ctx)])?;

    let overlay = ctx.config().relative_fixture(&ctx.config().overlay_file);
    let result = ctx.load_overlay(&overlay)?;
    staged.release();

    succeeded(&result)?;
    output_contains(&result, LOADED_OVERLAY)?;
    Ok(())
}

/// Stages the overlay and the bitstream it names into one firmware directory, then loads the overlay from there.
fn load_overlay_from_firmware_dir(ctx: &ScenarioContext<'_>, target: impl Fn(&str) -> PathBuf) -> ScenarioResult {
    let config = ctx.config();
    let overlay = target(&config.staged_overlay_name);

    let staged = ctx.stage([
        TestData::new(absolute_bitstream(ctx), target(&config.overlay_firmware_name)),
        TestData::new(config.absolute_fixture(&config.overlay_file), &overlay),
    ])?;

    let result = ctx.load_overlay(&overlay)?;
    staged.release();

    succeeded(&result)?;
    output_contains(&result, LOADED_OVERLAY)?;
    Ok(())
}

fn load_overlay_lib_firmware(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let config = ctx.config();
    load_overlay_from_firmware_dir(ctx, |file| config.firmware_target(file))
}

fn load_overlay_lib_firmware_xilinx(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let config = ctx.config();
    load_overlay_from_firmware_dir(ctx, |file| config.vendor_firmware_target(file))
}

fn load_overlay_full_path(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let staged = ctx.stage([expected_bitstream_beside_overlay(ctx)])?;

    let overlay = ctx.config().absolute_fixture(&ctx.config().overlay_file);
    let result = ctx.load_overlay(&overlay)?;
    staged.release();

    succeeded(&result)?;
    output_contains(&result, LOADED_OVERLAY)?;
    Ok(())
}

fn load_overlay_bad_path(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let result = ctx.run(&["load", "overlay", "/path/does/not/exist"])?;
    failed(&result)?;
    output_lacks(&result, LOADED_OVERLAY)?;
    error_contains(&result, OVERLAY_STATUS_TAG)?;
    Ok(())
}

fn load_overlay_missing_bitstream(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let overlay = ctx.config().relative_fixture(&ctx.config().overlay_file);

    let result = ctx.load_overlay(&overlay)?;
    failed(&result)?;
    output_lacks(&result, LOADED_OVERLAY)?;
    error_contains(&result, OVERLAY_STATUS_TAG)?;
    Ok(())
}

fn load_overlay_bad_flags(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    ctx.set_flags(ctx.config().invalid_flags)?;
    let flags = ctx.attribute("flags")?;

    let staged = ctx.stage([expected_bitstream_beside_overlay(ctx)])?;

    let overlay = ctx.config().relative_fixture(&ctx.config().overlay_file);
    let result = ctx.load_overlay(&overlay)?;
    staged.release();

    failed(&result)?;
    output_lacks(&result, LOADED_OVERLAY)?;
    error_contains(&result, OVERLAY_STATUS_TAG)?;

    attribute_unchanged(ctx.device(), "flags", &flags)
}

// -- status -- //

fn status_executes(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    succeeded(&ctx.status()?)?;
    Ok(())
}

fn status_with_bitstream(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let load = ctx.load_bitstream(&relative_bitstream(ctx))?;
    succeeded_with(&load, "Failed to load a bitstream before checking status.")?;

    let status = ctx.status()?;
    succeeded(&status)?;
    output_contains(&status, "operating")?;
    Ok(())
}

fn status_with_overlay(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let staged = ctx.stage([expected_bitstream_beside_overlay(ctx)])?;

    let overlay = ctx.config().relative_fixture(&ctx.config().overlay_file);
    let load = ctx.load_overlay(&overlay)?;
    staged.release();
    succeeded_with(&load, "Failed to load an overlay before checking status.")?;

    let status = ctx.status()?;
    succeeded(&status)?;
    output_contains(&status, "applied")?;
    output_contains(&status, "operating")?;
    output_contains(&status, &ctx.config().overlay_file)?;
    output_lacks(&status, "error")?;
    Ok(())
}

fn status_failed_overlay(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let overlay = ctx.config().relative_fixture(&ctx.config().overlay_file);
    let load = ctx.load_overlay(&overlay)?;
    failed_with(&load, "Overlay load succeeded and therefore test has failed.")?;

    let status = ctx.status()?;
    succeeded(&status)?;
    output_contains(&status, "error")?;
    Ok(())
}

// -- set -- //

fn flags_path(ctx: &ScenarioContext<'_>) -> String {
    ctx.device().attribute_path("flags").display().to_string()
}

fn set_flags_nonzero(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let result = ctx.run(&["set", "flags", "20"])?;
    succeeded(&result)?;
    output_contains(&result, &format!("20 written to {}", flags_path(ctx)))?;

    attribute_contains(ctx.device(), "flags", "20")
}

fn set_flags_string(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let before = ctx.attribute("flags")?;

    let result = ctx.run(&["set", "flags", "zero"])?;
    failed(&result)?;

    attribute_contains(ctx.device(), "flags", "0")?;
    attribute_unchanged(ctx.device(), "flags", &before)
}

fn set_state(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let old = ctx.attribute("state")?;

    let result = ctx.run(&["set", "state", "0"])?;
    failed(&result)?;

    attribute_unchanged(ctx.device(), "state", &old)
}

fn set_flags_float(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let before = ctx.attribute("flags")?;

    let result = ctx.run(&["set", "flags", "0.2"])?;
    failed(&result)?;

    attribute_contains(ctx.device(), "flags", "0")?;
    attribute_unchanged(ctx.device(), "flags", &before)
}

fn set_flags_zero(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    let result = ctx.run(&["set", "flags", "0"])?;
    succeeded(&result)?;
    output_contains(&result, &format!("0 written to {}", flags_path(ctx)))?;

    attribute_contains(ctx.device(), "flags", "0")
}

fn set_flags_idempotent(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    succeeded(&ctx.run(&["set", "flags", "20"])?)?;
    let first = ctx.attribute("flags")?;

    succeeded(&ctx.run(&["set", "flags", "20"])?)?;

    attribute_unchanged(ctx.device(), "flags", &first)
}

// -- help -- //

fn help(ctx: &ScenarioContext<'_>, args: &[&str]) -> ScenarioResult {
    let flags = ctx.attribute("flags")?;

    succeeded(&ctx.run(args)?)?;

    attribute_unchanged(ctx.device(), "flags", &flags)
}

fn help_main(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    help(ctx, &["help"])
}

fn help_main_as_flag(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    help(ctx, &["--help"])
}

fn help_set(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    help(ctx, &["help", "set"])
}

fn help_remove(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    help(ctx, &["help", "remove"])
}

fn help_remove_overlay(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    help(ctx, &["help", "remove", "overlay"])
}

fn help_remove_bitstream(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    help(ctx, &["help", "remove", "bitstream"])
}

fn help_load(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    help(ctx, &["help", "load"])
}

fn help_load_bitstream(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    help(ctx, &["help", "load", "bitstream"])
}

fn help_load_overlay(ctx: &mut ScenarioContext<'_>) -> ScenarioResult {
    help(ctx, &["help", "load", "overlay"])
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn scenario_names_are_unique() {
        let scenarios = fpgad_lifecycle();
        let names: HashSet<_> = scenarios.iter().map(|s| s.name).collect();

        assert_eq!(names.len(), scenarios.len());
    }

    #[test]
    fn loads_cover_every_path_form() {
        let names: HashSet<_> = fpgad_lifecycle().iter().map(|s| s.name).collect();

        for kind in ["bitstream", "overlay"] {
            for form in ["local", "full_path", "lib_firmware", "lib_firmware_xilinx"] {
                let form = if kind == "bitstream" && form == "full_path" { "home_fullpath" } else { form };
                let name = format!("load_{kind}_{form}");
                assert!(names.contains(name.as_str()), "missing {name}");
            }
        }
    }

    #[test]
    fn every_verb_is_covered() {
        let scenarios = fpgad_lifecycle();

        for prefix in ["load_bitstream_", "load_overlay_", "status_", "set_", "help_"] {
            assert!(
                scenarios.iter().any(|s| s.name.starts_with(prefix)),
                "no scenario for {prefix}"
            );
        }
    }
}
