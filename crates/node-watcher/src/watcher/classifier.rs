//! Classification of abnormal container terminations.

use api_types::ExitReason;

/// Termination reason the kubelet reports when a container exceeds its memory limit.
pub const OOM_KILLED_REASON: &str = "OOMKilled";

/// Exit code of a process terminated by SIGKILL (128 + 9).
pub const SIGKILL_EXIT_CODE: i32 = 137;

/// Classify a non-zero container termination.
///
/// The reason is checked before the exit code: an OOM-killed process may also exit
/// with 137, and must still be reported as OOM. Successful terminations (exit code 0)
/// are handled by the caller and never reach this function.
pub fn classify_exit(reason: Option<&str>, exit_code: i32) -> ExitReason {
    if reason == Some(OOM_KILLED_REASON) {
        ExitReason::Oom
    } else if exit_code == SIGKILL_EXIT_CODE {
        ExitReason::Killed
    } else {
        ExitReason::FatalError
    }
}
