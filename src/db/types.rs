use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "submissionstatus", rename_all = "snake_case")]
pub(crate) enum SubmissionStatus {
    Scheduled,
    InProgress,
    CompletedManual,
    CompletedAutoSubmitted,
    EvaluationTriggered,
    ExpiredError,
}

impl SubmissionStatus {
    /// Statuses the expiry sweep is allowed to finalize.
    pub(crate) const FINALIZABLE: [SubmissionStatus; 2] =
        [SubmissionStatus::InProgress, SubmissionStatus::ExpiredError];

    /// Completed statuses still waiting for an evaluation reference.
    pub(crate) const AWAITING_EVALUATION: [SubmissionStatus; 2] =
        [SubmissionStatus::CompletedManual, SubmissionStatus::CompletedAutoSubmitted];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::CompletedManual => "completed_manual",
            Self::CompletedAutoSubmitted => "completed_auto_submitted",
            Self::EvaluationTriggered => "evaluation_triggered",
            Self::ExpiredError => "expired_error",
        }
    }

    /// True once the session has been authoritatively ended.
    pub(crate) fn is_completed(self) -> bool {
        matches!(
            self,
            Self::CompletedManual | Self::CompletedAutoSubmitted | Self::EvaluationTriggered
        )
    }

    pub(crate) fn can_transition_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;

        matches!(
            (self, next),
            (Scheduled, InProgress)
                | (InProgress, CompletedManual)
                | (InProgress, CompletedAutoSubmitted)
                | (InProgress, ExpiredError)
                | (ExpiredError, CompletedAutoSubmitted)
                | (ExpiredError, ExpiredError)
                | (CompletedManual, EvaluationTriggered)
                | (CompletedAutoSubmitted, EvaluationTriggered)
        )
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transition ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum FinalizeMode {
    ManualSubmit,
    AutoDeadline,
}

impl FinalizeMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::ManualSubmit => "manual_submit",
            Self::AutoDeadline => "auto_deadline",
        }
    }

    pub(crate) fn target_status(self) -> SubmissionStatus {
        match self {
            Self::ManualSubmit => SubmissionStatus::CompletedManual,
            Self::AutoDeadline => SubmissionStatus::CompletedAutoSubmitted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SubmissionStatus::{self, *};

    const ALL: [SubmissionStatus; 6] = [
        Scheduled,
        InProgress,
        CompletedManual,
        CompletedAutoSubmitted,
        EvaluationTriggered,
        ExpiredError,
    ];

    #[test]
    fn completed_states_never_return_to_in_progress() {
        for from in ALL {
            if from.is_completed() {
                assert!(!from.can_transition_to(InProgress), "{from} -> in_progress allowed");
                assert!(!from.can_transition_to(Scheduled), "{from} -> scheduled allowed");
            }
        }
        assert!(!ExpiredError.can_transition_to(InProgress));
    }

    #[test]
    fn evaluation_triggered_is_terminal() {
        for to in ALL {
            assert!(!EvaluationTriggered.can_transition_to(to));
        }
    }

    #[test]
    fn only_completed_states_feed_evaluation() {
        let sources: Vec<_> =
            ALL.into_iter().filter(|from| from.can_transition_to(EvaluationTriggered)).collect();
        assert_eq!(sources, vec![CompletedManual, CompletedAutoSubmitted]);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&CompletedAutoSubmitted).unwrap();
        assert_eq!(json, "\"completed_auto_submitted\"");
    }
}
