use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    RefundRequest,
    OrderStatus,
    Qa,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefundRequest => "refund_request",
            Self::OrderStatus => "order_status",
            Self::Qa => "qa",
        }
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentLabel {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "refund_request" => Ok(Self::RefundRequest),
            "order_status" => Ok(Self::OrderStatus),
            "qa" => Ok(Self::Qa),
            other => Err(ValidationError::UnknownIntent(other.to_string())),
        }
    }
}

impl PartialEq<&str> for IntentLabel {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeHint {
    Today,
    Yesterday,
    LastWeek,
    LastMonth,
}

impl TimeHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::LastWeek => "last_week",
            Self::LastMonth => "last_month",
        }
    }
}

impl PartialEq<&str> for TimeHint {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSlots {
    pub order_id: Option<String>,
    pub time_hint: Option<TimeHint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyMetadata {
    pub has_pii: bool,
    pub pii_types: Vec<String>,
    pub prompt_injection_suspected: bool,
}

impl SafetyMetadata {
    pub fn from_labels(labels: &[String]) -> Self {
        Self {
            has_pii: !labels.is_empty(),
            pii_types: labels.to_vec(),
            prompt_injection_suspected: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub plan_hint: String,
    pub agents: Vec<String>,
    #[serde(default)]
    pub est_cost: CostTier,
    pub notes: Option<String>,
}

/// Classifier output. Construction validates the confidence range and that
/// at least one route candidate exists; the value is never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntentPayload {
    intent: IntentLabel,
    confidence: f64,
    slots: IntentSlots,
    safety: SafetyMetadata,
    route_candidates: Vec<RouteCandidate>,
    reason: String,
}

impl IntentPayload {
    pub fn new(
        intent: IntentLabel,
        confidence: f64,
        slots: IntentSlots,
        safety: SafetyMetadata,
        route_candidates: Vec<RouteCandidate>,
        reason: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(confidence));
        }
        if route_candidates.is_empty() {
            return Err(ValidationError::MissingRouteCandidates);
        }

        Ok(Self { intent, confidence, slots, safety, route_candidates, reason: reason.into() })
    }

    pub fn intent(&self) -> IntentLabel {
        self.intent
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn slots(&self) -> &IntentSlots {
        &self.slots
    }

    pub fn safety(&self) -> &SafetyMetadata {
        &self.safety
    }

    pub fn route_candidates(&self) -> &[RouteCandidate] {
        &self.route_candidates
    }

    /// The only candidate the planner consumes. Lower-ranked candidates are
    /// carried for observability but never executed.
    pub fn primary_candidate(&self) -> &RouteCandidate {
        &self.route_candidates[0]
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}
