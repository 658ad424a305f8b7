#![expect(clippy::unwrap_used, reason = "test code can panic on errors")]

mod simulated;
