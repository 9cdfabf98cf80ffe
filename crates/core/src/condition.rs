//! Condition bookkeeping for an object's observed state.
//!
//! Conditions are upserted by type: there is at most one condition per type,
//! and `last_transition_time` only moves when the status flips.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the object is ready to act.
pub const CONDITION_TYPE_READY: &str = "Ready";
/// Whether the object is up to date with its desired state.
pub const CONDITION_TYPE_SYNCED: &str = "Synced";

/// Placeholder reason; some stores reject empty reasons.
pub const DEFAULT_REASON: &str = "empty";

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// A named status flag attached to an object's observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a condition transitioning now.
    pub fn new(condition_type: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            observed_generation: 0,
            reason: String::new(),
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    /// `Synced` condition for the given generation.
    pub fn synced(synced: bool, generation: i64) -> Self {
        let message = if synced {
            "the object is synced"
        } else {
            "the object is reconciling"
        };
        Self::new(CONDITION_TYPE_SYNCED, synced.into())
            .with_observed_generation(generation)
            .with_message(message)
    }

    /// Set the observed generation.
    #[must_use]
    pub const fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Set the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the transition time.
    #[must_use]
    pub const fn with_transition_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_transition_time = at;
        self
    }

    /// Whether the status is `True`.
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Embeddable status block holding an object's conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ConditionalStatus {
    /// Upsert a condition by type.
    pub fn set_condition(&mut self, mut condition: Condition) {
        if condition.reason.is_empty() {
            condition.reason = DEFAULT_REASON.to_string();
        }
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status != condition.status {
                    existing.status = condition.status;
                    existing.last_transition_time = condition.last_transition_time;
                }
                existing.reason = condition.reason;
                existing.message = condition.message;
                existing.observed_generation = condition.observed_generation;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Look up a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Remove a condition by type, returning whether one was present.
    pub fn remove_condition(&mut self, condition_type: &str) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| c.condition_type != condition_type);
        self.conditions.len() != before
    }

    /// Whether the condition of the given type is `True`; absence is false.
    pub fn is_true(&self, condition_type: &str) -> bool {
        self.condition(condition_type).is_some_and(Condition::is_true)
    }
}

/// Capability of objects that track conditions.
pub trait Conditional {
    /// The object's condition block.
    fn conditional_status(&self) -> &ConditionalStatus;

    /// Mutable access to the object's condition block.
    fn conditional_status_mut(&mut self) -> &mut ConditionalStatus;

    /// Upsert a condition by type.
    fn set_condition(&mut self, condition: Condition) {
        self.conditional_status_mut().set_condition(condition);
    }

    /// All conditions.
    fn conditions(&self) -> &[Condition] {
        &self.conditional_status().conditions
    }

    /// Look up a condition by type.
    fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditional_status().condition(condition_type)
    }

    /// Whether `Ready` is currently `True`.
    fn is_ready(&self) -> bool {
        self.conditional_status().is_true(CONDITION_TYPE_READY)
    }

    /// Whether `Synced` is currently `True`.
    fn is_synced(&self) -> bool {
        self.conditional_status().is_true(CONDITION_TYPE_SYNCED)
    }
}
