//! Checks on captured fpgad invocations.
//!
//! Every failure carries the full invocation, so a report never needs the scenario to be run again.

use crate::cli::InvocationResult;
use crate::device::FpgaDevice;
use crate::error::{ContractViolation, ScenarioError};

fn exit_code_repr(result: &InvocationResult) -> String {
    match result.exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_owned(),
    }
}

fn violation(result: &InvocationResult, expectation: String, actual: String) -> ContractViolation {
    ContractViolation {
        expectation,
        actual,
        invocation: Some(result.clone()),
    }
}

pub fn succeeded(result: &InvocationResult) -> Result<(), ContractViolation> {
    succeeded_with(result, "expected exit code 0")
}

/// Same as [`succeeded`], with the given context leading the report.
pub fn succeeded_with(result: &InvocationResult, context: &str) -> Result<(), ContractViolation> {
    if result.success() {
        Ok(())
    } else {
        Err(violation(result, context.to_owned(), exit_code_repr(result)))
    }
}

pub fn failed(result: &InvocationResult) -> Result<(), ContractViolation> {
    failed_with(result, "expected a nonzero exit code")
}

pub fn failed_with(result: &InvocationResult, context: &str) -> Result<(), ContractViolation> {
    if result.success() {
        Err(violation(result, context.to_owned(), exit_code_repr(result)))
    } else {
        Ok(())
    }
}

pub fn output_contains(result: &InvocationResult, substring: &str) -> Result<(), ContractViolation> {
    if result.stdout.contains(substring) {
        Ok(())
    } else {
        Err(violation(
            result,
            format!("'{substring}' not found in stdout"),
            "missing".to_owned(),
        ))
    }
}

pub fn output_lacks(result: &InvocationResult, substring: &str) -> Result<(), ContractViolation> {
    if result.stdout.contains(substring) {
        Err(violation(
            result,
            format!("undesired '{substring}' found in stdout"),
            "present".to_owned(),
        ))
    } else {
        Ok(())
    }
}

pub fn error_contains(result: &InvocationResult, substring: &str) -> Result<(), ContractViolation> {
    if result.stderr.contains(substring) {
        Ok(())
    } else {
        Err(violation(
            result,
            format!("'{substring}' not found in stderr"),
            "missing".to_owned(),
        ))
    }
}

/// Reads a device attribute and checks it contains `expected`.
pub fn attribute_contains(device: &FpgaDevice, attribute: &str, expected: &str) -> Result<(), ScenarioError> {
    let actual = device.read_attribute(attribute)?;

    if actual.contains(expected) {
        Ok(())
    } else {
        Err(ContractViolation {
            expectation: format!("attribute `{attribute}` should contain '{expected}'"),
            actual,
            invocation: None,
        }
        .into())
    }
}

/// Reads a device attribute and checks it still holds `before`.
pub fn attribute_unchanged(device: &FpgaDevice, attribute: &str, before: &str) -> Result<(), ScenarioError> {
    let actual = device.read_attribute(attribute)?;

    if actual == before {
        Ok(())
    } else {
        Err(ContractViolation {
            expectation: format!("attribute `{attribute}` should still be '{before}'"),
            actual,
            invocation: None,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn result(exit_code: i32, stdout: &str, stderr: &str) -> InvocationResult {
        InvocationResult {
            command: "fpgad load bitstream /this/path/is/fake.bit.bin".to_owned(),
            exit_code: Some(exit_code),
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        }
    }

    #[rstest]
    #[case(0, true)]
    #[case(1, false)]
    #[case(2, false)]
    #[case(-1, false)]
    fn exit_code_predicates(#[case] code: i32, #[case] success: bool) {
        let result = result(code, "", "");

        assert_eq!(succeeded(&result).is_ok(), success);
        assert_eq!(failed(&result).is_ok(), !success);
    }

    #[test]
    fn violation_report_is_self_contained() {
        let result = result(1, "", "Error: FpgadError::IOWrite: An IO error occurred");

        let violation = succeeded_with(&result, "Failed to load a bitstream before checking status.").unwrap_err();
        let report = violation.to_string();

        assert!(report.starts_with("Failed to load a bitstream before checking status.\n"));
        assert!(report.contains("actual:\texit code 1"));
        assert!(report.contains("command:\tfpgad load bitstream /this/path/is/fake.bit.bin"));
        assert!(report.contains("stderr:\tError: FpgadError::IOWrite: An IO error occurred"));
    }

    #[test]
    fn stream_predicates_look_at_the_right_stream() {
        let result = result(0, "loaded to fpga0 using firmware lookup path", "warning: operating");

        assert!(output_contains(&result, "loaded to fpga0").is_ok());
        assert!(output_contains(&result, "warning").is_err());
        assert!(output_lacks(&result, "error").is_ok());
        assert!(output_lacks(&result, "fpga0").is_err());
        assert!(error_contains(&result, "operating").is_ok());
        assert!(error_contains(&result, "loaded").is_err());
    }

    #[test]
    fn attribute_checks() {
        let tempdir = tempfile::tempdir().unwrap();
        std::fs::write(tempdir.path().join("flags"), "20\n").unwrap();
        let device = FpgaDevice::new(tempdir.path());

        assert!(attribute_contains(&device, "flags", "20").is_ok());
        assert!(matches!(
            attribute_contains(&device, "flags", "DF"),
            Err(ScenarioError::Contract(_))
        ));
        assert!(attribute_unchanged(&device, "flags", "20").is_ok());
        assert!(attribute_unchanged(&device, "flags", "0").is_err());
        assert!(matches!(
            attribute_contains(&device, "state", "operating"),
            Err(ScenarioError::Resource { .. })
        ));
    }
}
