use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::condition::{evaluate, is_empty, Condition, FormData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Visibility,
    Validation,
    Calculation,
    Jump,
    Prefill,
    Notification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
}

/// Effect a rule requests once its conditions pass. Only `SetValue` on prefill rules is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    SetValue { target: String, value: Value },
    Show { target: String },
    Hide { target: String },
    Require { target: String },
    JumpToStep { step: u32 },
    Calculate { target: String, expression: String },
    Notify { recipient: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicRule {
    pub id: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default)]
    pub sort_order: i32,
}

fn active_by_default() -> bool {
    true
}

impl LogicRule {
    fn passes(&self, values: &FormData, resolves: &impl Fn(&Condition) -> bool) -> bool {
        let mut outcomes = self
            .conditions
            .iter()
            .map(|condition| resolves(condition) && evaluate(condition, values));
        match self.condition_logic {
            ConditionLogic::And => outcomes.all(|passed| passed),
            ConditionLogic::Or => outcomes.any(|passed| passed),
        }
    }
}

/// Apply active rules in ascending `sort_order` until no empty field gets filled.
/// Populated fields are never overwritten, so a second run on the output changes nothing.
pub fn apply_rules(rules: &[LogicRule], values: &FormData) -> FormData {
    apply_rules_with(rules, values, |_| true)
}

pub(crate) fn apply_rules_with(
    rules: &[LogicRule],
    values: &FormData,
    resolves: impl Fn(&Condition) -> bool,
) -> FormData {
    let mut ordered: Vec<&LogicRule> = rules
        .iter()
        .filter(|rule| rule.is_active && rule.rule_type == RuleType::Prefill)
        .collect();
    ordered.sort_by_key(|rule| rule.sort_order);

    // Every extra pass fills at least one target, so the number of targets bounds the loop.
    let targets = ordered
        .iter()
        .flat_map(|rule| &rule.actions)
        .filter(|action| matches!(action, RuleAction::SetValue { .. }))
        .count();

    let mut next = values.clone();
    for _ in 0..=targets {
        if !prefill_pass(&ordered, &mut next, &resolves) {
            break;
        }
    }
    next
}

/// One ordered pass. Returns whether any empty field became populated.
fn prefill_pass(
    ordered: &[&LogicRule],
    values: &mut FormData,
    resolves: &impl Fn(&Condition) -> bool,
) -> bool {
    let mut filled = false;
    for rule in ordered {
        if !rule.passes(values, resolves) {
            continue;
        }
        for action in &rule.actions {
            let RuleAction::SetValue { target, value } = action else {
                continue;
            };
            if is_empty(values.get(target)) && values.get(target) != Some(value) {
                debug!(rule = %rule.id, %target, "prefilling empty field");
                values.insert(target.clone(), value.clone());
                filled |= !is_empty(Some(value));
            }
        }
    }
    filled
}
