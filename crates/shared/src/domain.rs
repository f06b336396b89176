use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(CandidateId);
id_newtype!(BoardItemId);
id_newtype!(ColumnId);
id_newtype!(WorkflowId);
id_newtype!(UserId);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseDomainError {
    kind: &'static str,
    value: String,
}

/// Hiring phases in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    CvReview,
    PhoneScreening,
    TechnicalInterview,
    CulturalFit,
    FinalDecision,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::CvReview,
        Phase::PhoneScreening,
        Phase::TechnicalInterview,
        Phase::CulturalFit,
        Phase::FinalDecision,
    ];

    pub fn index(self) -> usize {
        match self {
            Phase::CvReview => 0,
            Phase::PhoneScreening => 1,
            Phase::TechnicalInterview => 2,
            Phase::CulturalFit => 3,
            Phase::FinalDecision => 4,
        }
    }

    /// The phase that follows in sequence, `None` for the terminal phase.
    pub fn next(self) -> Option<Phase> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::CvReview => "cv_review",
            Phase::PhoneScreening => "phone_screening",
            Phase::TechnicalInterview => "technical_interview",
            Phase::CulturalFit => "cultural_fit",
            Phase::FinalDecision => "final_decision",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::CvReview => "CV Review",
            Phase::PhoneScreening => "Phone Screening",
            Phase::TechnicalInterview => "Technical Interview",
            Phase::CulturalFit => "Cultural Fit",
            Phase::FinalDecision => "Final Decision",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| ParseDomainError {
                kind: "phase",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Passed,
    Failed,
    Pending,
    Skipped,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Passed => "passed",
            Decision::Failed => "failed",
            Decision::Pending => "pending",
            Decision::Skipped => "skipped",
        }
    }
}

impl FromStr for Decision {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(Decision::Passed),
            "failed" => Ok(Decision::Failed),
            "pending" => Ok(Decision::Pending),
            "skipped" => Ok(Decision::Skipped),
            other => Err(ParseDomainError {
                kind: "decision",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    #[default]
    Active,
    Completed,
    Rejected,
    Withdrawn,
    OnHold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Info,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions_parse_from_their_wire_names() {
        for decision in [
            Decision::Passed,
            Decision::Failed,
            Decision::Pending,
            Decision::Skipped,
        ] {
            assert_eq!(decision.as_str().parse::<Decision>(), Ok(decision));
        }
        assert!("maybe".parse::<Decision>().is_err());
    }

    #[test]
    fn phases_advance_in_order_until_the_final_decision() {
        assert_eq!(Phase::CvReview.next(), Some(Phase::PhoneScreening));
        assert_eq!(Phase::FinalDecision.next(), None);
        assert_eq!("cultural_fit".parse::<Phase>(), Ok(Phase::CulturalFit));
    }
}
