use crate::crd::claim::ClaimStatus;
use crate::crd::instance::{Condition, ConditionStatus, ConditionType};
use crate::crd::template::{TemplateStatus, TemplateStatusType};
use crate::error::Error;

use super::claim::ClaimPhase;

pub fn succeeded(type_: ConditionType, message: &str, now: String) -> Condition {
    Condition {
        type_,
        status: ConditionStatus::Succeeded,
        reason: None,
        message: Some(message.to_string()),
        last_transition_time: Some(now),
    }
}

pub fn failed(type_: ConditionType, err: &Error, now: String) -> Condition {
    Condition {
        type_,
        status: ConditionStatus::Error,
        reason: Some(err.reason().to_string()),
        message: Some(err.to_string()),
        last_transition_time: Some(now),
    }
}

pub fn template(
    status: TemplateStatusType,
    message: &str,
    reason: Option<String>,
) -> TemplateStatus {
    TemplateStatus {
        message: Some(message.to_string()),
        reason,
        status: Some(status),
    }
}

pub fn claim(
    phase: ClaimPhase,
    handled: bool,
    reason: Option<String>,
    message: Option<String>,
    now: String,
) -> ClaimStatus {
    ClaimStatus {
        status: Some(phase.as_str().to_string()),
        reason,
        message,
        handled,
        last_transition_time: Some(now),
    }
}
