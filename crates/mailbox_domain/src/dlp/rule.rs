use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a [`DlpRule`], unique within a domain.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DlpRuleId(pub String);

impl fmt::Display for DlpRuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which parts of a mail a rule is matched against.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlpTargets {
    /// The sender address.
    #[serde(rename = "targetsSender")]
    pub sender: bool,
    /// The recipient addresses.
    #[serde(rename = "targetsRecipients")]
    pub recipients: bool,
    /// The subject and body.
    #[serde(rename = "targetsContent")]
    pub content: bool,
}

/// A data loss prevention rule: mails matching `expression` on one of the
/// targeted parts are flagged.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlpRule {
    /// Identifier of the rule.
    pub id: DlpRuleId,
    /// Regular expression matched against the targeted parts.
    pub expression: String,
    /// Human readable reason for the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Targeted parts of the mail.
    #[serde(flatten)]
    pub targets: DlpTargets,
}

impl DlpRule {
    /// Compiles the rule's expression.
    pub fn compile(&self) -> Result<Regex, DlpError> {
        Regex::new(&self.expression).map_err(|err| DlpError::InvalidExpression {
            rule: self.id.clone(),
            reason: err.to_string(),
        })
    }

    /// Whether `text` matches the rule's expression.
    pub fn matches(&self, text: &str) -> Result<bool, DlpError> {
        Ok(self.compile()?.is_match(text))
    }
}

/// Checks a rule set before it is stored: ids must be unique and every
/// expression must compile.
pub fn validate_rules(rules: &[DlpRule]) -> Result<(), DlpError> {
    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<_> = rules
        .iter()
        .filter(|rule| !seen.insert(&rule.id))
        .map(|rule| rule.id.clone())
        .collect();
    if !duplicates.is_empty() {
        return Err(DlpError::DuplicateRuleIds(duplicates.into_iter().collect()));
    }

    rules.iter().try_for_each(|rule| rule.compile().map(|_| ()))
}

/// Errors of the DLP context.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DlpError {
    /// Several rules of a stored set share an id.
    #[error("duplicate rule ids: {}", .0.iter().map(|id| id.0.as_str()).collect::<Vec<_>>().join(", "))]
    DuplicateRuleIds(Vec<DlpRuleId>),
    /// A rule's expression is not a valid regular expression.
    #[error("invalid expression for rule {rule}: {reason}")]
    InvalidExpression {
        /// The offending rule.
        rule: DlpRuleId,
        /// The regex compilation error.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, expression: &str) -> DlpRule {
        DlpRule {
            id: DlpRuleId(id.to_string()),
            expression: expression.to_string(),
            explanation: None,
            targets: DlpTargets {
                sender: true,
                ..DlpTargets::default()
            },
        }
    }

    #[test]
    fn serializes_with_flat_targets() {
        let mut rule = rule("1", "^bad@.*$");
        rule.explanation = Some("no bad senders".to_string());
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "1",
                "expression": "^bad@.*$",
                "explanation": "no bad senders",
                "targetsSender": true,
                "targetsRecipients": false,
                "targetsContent": false,
            })
        );
        assert_eq!(serde_json::from_value::<DlpRule>(json).unwrap(), rule);
    }

    #[test]
    fn matches_expression() {
        let rule = rule("1", "secret-[0-9]+");
        assert_eq!(rule.matches("leaking secret-42"), Ok(true));
        assert_eq!(rule.matches("nothing here"), Ok(false));
    }

    #[test]
    fn invalid_expression_is_rejected() {
        assert!(matches!(
            validate_rules(&[rule("1", "a"), rule("2", "(unclosed")]),
            Err(DlpError::InvalidExpression { rule, .. }) if rule == DlpRuleId("2".to_string())
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        assert_eq!(
            validate_rules(&[rule("1", "a"), rule("2", "b"), rule("1", "c")]),
            Err(DlpError::DuplicateRuleIds(vec![DlpRuleId("1".to_string())]))
        );
        assert_eq!(validate_rules(&[rule("1", "a"), rule("2", "b")]), Ok(()));
    }
}
