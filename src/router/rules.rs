//! Routing rules
//!
//! A rule is a priority-ordered `predicate -> action` pair applied to every
//! routed message. Predicates are pure functions of the message; actions are
//! data. Rule failures never fail the message: the router logs them, emits
//! a `RuleError`, and continues with the message unchanged.

use crate::messages::{Message, Priority};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A pure predicate deciding whether a rule applies to a message
pub type RulePredicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Comparison operators available to filter conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Field equals the value
    Equals,
    /// Field differs from the value
    NotEquals,
    /// String field contains the value as a substring, or array field
    /// contains the value as an element
    Contains,
    /// Field is numerically or lexicographically greater
    GreaterThan,
    /// Field is numerically or lexicographically smaller
    LessThan,
}

/// A condition evaluated against a dotted field path of the message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Dotted path into the message's canonical JSON (e.g. `payload.risk`)
    pub field: String,
    /// Comparison operator
    pub operator: FilterOperator,
    /// Value to compare against
    pub value: Value,
}

impl FilterCondition {
    /// Evaluates the condition against a message
    ///
    /// A missing field satisfies nothing: `equals` and ordering operators
    /// are false, `not_equals` is true.
    ///
    /// # Errors
    /// Returns a description when the message cannot be rendered to JSON.
    pub fn is_satisfied_by(&self, message: &Message) -> Result<bool, String> {
        let doc = serde_json::to_value(message).map_err(|e| e.to_string())?;
        let field = lookup_path(&doc, &self.field);

        Ok(match self.operator {
            FilterOperator::Equals => field == Some(&self.value),
            FilterOperator::NotEquals => field != Some(&self.value),
            FilterOperator::Contains => field.is_some_and(|f| contains(f, &self.value)),
            FilterOperator::GreaterThan => {
                field.is_some_and(|f| compare(f, &self.value) == Some(std::cmp::Ordering::Greater))
            }
            FilterOperator::LessThan => {
                field.is_some_and(|f| compare(f, &self.value) == Some(std::cmp::Ordering::Less))
            }
        })
    }
}

/// Resolves a dotted path inside a JSON document
fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn contains(field: &Value, needle: &Value) -> bool {
    match (field, needle) {
        (Value::String(haystack), Value::String(sub)) => haystack.contains(sub.as_str()),
        (Value::Array(items), value) => items.contains(value),
        _ => false,
    }
}

fn compare(field: &Value, other: &Value) -> Option<std::cmp::Ordering> {
    match (field, other) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Field overrides applied by `transform` and `duplicate` actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    /// Shallow-merged into the payload object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    /// Shallow-merged into the metadata object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Replaces the message type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    /// Replaces the priority
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl TransformSpec {
    /// Applies the overrides to a message in place
    ///
    /// # Errors
    /// Returns a description when a metadata override produces a shape the
    /// metadata struct cannot represent; the message is left unchanged in
    /// that case.
    pub fn apply(&self, message: &mut Message) -> Result<(), String> {
        if let Some(overrides) = &self.metadata {
            let mut merged =
                serde_json::to_value(&message.metadata).map_err(|e| e.to_string())?;
            if let Value::Object(map) = &mut merged {
                for (key, value) in overrides {
                    map.insert(key.clone(), value.clone());
                }
            }
            message.metadata = serde_json::from_value(merged).map_err(|e| e.to_string())?;
        }

        if let Some(overrides) = &self.payload {
            match &mut message.payload {
                Value::Object(map) => {
                    for (key, value) in overrides {
                        map.insert(key.clone(), value.clone());
                    }
                }
                other => {
                    // Non-object payloads are replaced wholesale
                    *other = Value::Object(overrides.clone());
                }
            }
        }

        if let Some(message_type) = &self.message_type {
            message.message_type = message_type.clone();
        }
        if let Some(priority) = self.priority {
            message.priority = priority;
        }
        Ok(())
    }
}

/// What a matching rule does with the message
#[derive(Debug, Clone)]
pub enum RuleAction {
    /// Terminate routing with a `filtered` receipt unless the condition holds
    Filter(FilterCondition),
    /// Merge overrides into the message and continue
    Transform(TransformSpec),
    /// Deliver derived copies to the listed agents as a side effect
    Forward {
        /// Recipients of the forwarded copies
        targets: Vec<String>,
    },
    /// Route additional copies of the message
    Duplicate {
        /// Number of copies
        count: u32,
        /// Overrides merged into each copy
        modifications: Option<TransformSpec>,
    },
    /// Suspend the pipeline before continuing
    Delay {
        /// Suspension in milliseconds
        delay_ms: u64,
    },
}

/// A registered routing rule
#[derive(Clone)]
pub struct RoutingRule {
    /// Stable rule identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Evaluation priority; higher runs first
    pub priority: i64,
    /// Disabled rules are skipped without evaluation
    pub enabled: bool,
    /// Pure predicate deciding applicability
    pub predicate: RulePredicate,
    /// Action applied when the predicate matches
    pub action: RuleAction,
}

impl RoutingRule {
    /// Creates an enabled rule
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        priority: i64,
        predicate: impl Fn(&Message) -> bool + Send + Sync + 'static,
        action: RuleAction,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            enabled: true,
            predicate: Arc::new(predicate),
            action,
        }
    }
}

impl fmt::Debug for RoutingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}
