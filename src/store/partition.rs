use crate::db::models::{AssessmentDefinition, Submission, SubmissionKey};

/// Entity types persisted in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EntityKind {
    Submission,
    Assessment,
    Evaluation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartitionRule {
    pub(crate) kind: EntityKind,
    pub(crate) container: &'static str,
    pub(crate) partition_key_field: &'static str,
}

pub(crate) const PARTITION_RULES: [PartitionRule; 3] = [
    PartitionRule {
        kind: EntityKind::Submission,
        container: "submissions",
        partition_key_field: "assessment_id",
    },
    PartitionRule { kind: EntityKind::Assessment, container: "assessments", partition_key_field: "id" },
    PartitionRule {
        kind: EntityKind::Evaluation,
        container: "evaluations",
        partition_key_field: "submission_id",
    },
];

pub(crate) const fn rule_for(kind: EntityKind) -> &'static PartitionRule {
    match kind {
        EntityKind::Submission => &PARTITION_RULES[0],
        EntityKind::Assessment => &PARTITION_RULES[1],
        EntityKind::Evaluation => &PARTITION_RULES[2],
    }
}

/// Anything that can be routed to a single partition.
pub(crate) trait Partitioned {
    const KIND: EntityKind;

    fn partition_key(&self) -> &str;

    fn container() -> &'static str {
        rule_for(Self::KIND).container
    }
}

impl Partitioned for Submission {
    const KIND: EntityKind = EntityKind::Submission;

    fn partition_key(&self) -> &str {
        &self.assessment_id
    }
}

impl Partitioned for SubmissionKey {
    const KIND: EntityKind = EntityKind::Submission;

    fn partition_key(&self) -> &str {
        &self.assessment_id
    }
}

impl Partitioned for AssessmentDefinition {
    const KIND: EntityKind = EntityKind::Assessment;

    fn partition_key(&self) -> &str {
        &self.id
    }
}
