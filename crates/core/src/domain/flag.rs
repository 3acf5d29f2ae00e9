// Rollout Flag Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Targeting rule comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    In,
    NotIn,
}

/// Attribute predicate a caller must satisfy to be eligible for a flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetingRule {
    pub attribute: String,
    pub operator: RuleOperator,
    pub values: Vec<String>,
}

impl TargetingRule {
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: RuleOperator::Equals,
            values: vec![value.into()],
        }
    }

    pub fn one_of(attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: RuleOperator::In,
            values,
        }
    }

    /// A caller missing the attribute only passes `NotIn`
    pub fn matches(&self, ctx: &CallerContext) -> bool {
        let actual = ctx.attributes.get(&self.attribute);
        match (self.operator, actual) {
            (RuleOperator::Equals, Some(v)) => self.values.first() == Some(v),
            (RuleOperator::In, Some(v)) => self.values.contains(v),
            (RuleOperator::NotIn, Some(v)) => !self.values.contains(v),
            (RuleOperator::NotIn, None) => true,
            (_, None) => false,
        }
    }
}

/// Who is asking (shop user, device, terminal)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    /// Stable identity used for bucketing; `None` gets a random draw per evaluation
    pub caller_id: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl CallerContext {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: Some(caller_id.into()),
            attributes: HashMap::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Rollout Flag Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutFlag {
    pub name: String,
    pub enabled: bool,
    pub rollout_percentage: u8, // 0..=100
    pub targeting_rules: Vec<TargetingRule>,
    pub created_at: i64, // epoch ms
    pub updated_at: i64,
}

impl RolloutFlag {
    pub fn new(
        name: impl Into<String>,
        rollout_percentage: u32,
        targeting_rules: Vec<TargetingRule>,
        now_millis: i64,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "flag name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            name,
            enabled: true,
            rollout_percentage: validate_percentage(rollout_percentage)?,
            targeting_rules,
            created_at: now_millis,
            updated_at: now_millis,
        })
    }

    /// Replace percentage and rules; re-enables a previously disabled flag
    pub fn update(
        &mut self,
        rollout_percentage: u32,
        targeting_rules: Vec<TargetingRule>,
        now_millis: i64,
    ) -> Result<()> {
        self.rollout_percentage = validate_percentage(rollout_percentage)?;
        self.targeting_rules = targeting_rules;
        self.enabled = true;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Full rollout, targeting cleared
    pub fn promote(&mut self, now_millis: i64) {
        self.enabled = true;
        self.rollout_percentage = 100;
        self.targeting_rules.clear();
        self.updated_at = now_millis;
    }

    /// Disabled, zero percent
    pub fn roll_back(&mut self, now_millis: i64) {
        self.enabled = false;
        self.rollout_percentage = 0;
        self.updated_at = now_millis;
    }

    pub fn rules_match(&self, ctx: &CallerContext) -> bool {
        self.targeting_rules.iter().all(|rule| rule.matches(ctx))
    }

    /// Whether a caller at `bucket` (in [0,1)) is inside the cohort
    pub fn admits(&self, bucket: f64, ctx: &CallerContext) -> bool {
        self.enabled
            && bucket < f64::from(self.rollout_percentage) / 100.0
            && self.rules_match(ctx)
    }
}

fn validate_percentage(value: u32) -> Result<u8> {
    if value > 100 {
        return Err(DomainError::InvalidPercentage(value));
    }
    Ok(value as u8)
}
