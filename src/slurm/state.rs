use crate::slurm::SchedulerState;

/// Map a raw sacct state onto a canonical state
///
/// sacct reports states like `CANCELLED by 1000` or truncated `RUNNING+`, only the leading word
/// matters. Anything outside the table is [SchedulerState::Unknown].
pub fn from_raw(raw: &str) -> SchedulerState {
    let token = raw.split_whitespace().next().unwrap_or("").trim_end_matches('+');
    match token.to_ascii_uppercase().as_str() {
        "PENDING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "RESV_DEL_HOLD" | "CONFIGURING" => {
            SchedulerState::Pending
        }
        "RUNNING" | "COMPLETING" | "SUSPENDED" | "STOPPED" | "SIGNALING" | "STAGE_OUT" | "RESIZING" => {
            SchedulerState::Running
        }
        "COMPLETED" => SchedulerState::Completed,
        "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE" | "PREEMPTED" => {
            SchedulerState::Failed
        }
        "CANCELLED" => SchedulerState::Cancelled,
        _ => SchedulerState::Unknown,
    }
}

/// Canonical state from the first line of `sacct -n --format=State --parsable2` output
pub fn parse_sacct(stdout: &str) -> SchedulerState {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(from_raw)
        .unwrap_or(SchedulerState::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_table() {
        assert_eq!(from_raw("PENDING"), SchedulerState::Pending);
        assert_eq!(from_raw("REQUEUED"), SchedulerState::Pending);
        assert_eq!(from_raw("RUNNING"), SchedulerState::Running);
        assert_eq!(from_raw("COMPLETING"), SchedulerState::Running);
        assert_eq!(from_raw("COMPLETED"), SchedulerState::Completed);
        assert_eq!(from_raw("TIMEOUT"), SchedulerState::Failed);
        assert_eq!(from_raw("OUT_OF_MEMORY"), SchedulerState::Failed);
        assert_eq!(from_raw("NODE_FAIL"), SchedulerState::Failed);
        assert_eq!(from_raw("CANCELLED"), SchedulerState::Cancelled);
    }

    #[test]
    fn test_leading_token_only() {
        assert_eq!(from_raw("CANCELLED by 1000"), SchedulerState::Cancelled);
        assert_eq!(from_raw("RUNNING+"), SchedulerState::Running);
        assert_eq!(from_raw("completed"), SchedulerState::Completed);
    }

    #[test]
    fn test_unknown_states() {
        assert_eq!(from_raw(""), SchedulerState::Unknown);
        assert_eq!(from_raw("PD"), SchedulerState::Unknown);
        assert_eq!(from_raw("slurm_load_jobs error"), SchedulerState::Unknown);
    }

    #[test]
    fn test_first_line_wins() {
        assert_eq!(parse_sacct("COMPLETED\nCOMPLETED\nCOMPLETED\n"), SchedulerState::Completed);
        assert_eq!(parse_sacct("\nFAILED\nCANCELLED\n"), SchedulerState::Failed);
        assert_eq!(parse_sacct(""), SchedulerState::Unknown);
        assert_eq!(parse_sacct("   \n"), SchedulerState::Unknown);
    }
}
