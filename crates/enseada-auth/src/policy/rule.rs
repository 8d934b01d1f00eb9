//! Policy rules and the in-memory rule table.
//!
//! Rules are tuples tagged with a policy type. `p` rules are permissions
//! `(subject, object, action)`; `g` rules are role assignments
//! `(user, role)`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix of every policy rule document id.
pub const RULE_ID_PREFIX: &str = "rule-";

/// Section of the policy model a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    /// Permissions.
    P,
    /// Role assignments.
    G,
}

impl Section {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P => "p",
            Self::G => "g",
        }
    }
}

/// One rule: a policy type plus its values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyRule {
    pub ptype: String,
    pub values: Vec<String>,
}

impl PolicyRule {
    pub fn new<I, S>(ptype: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ptype: ptype.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `p, subject, object, action`
    pub fn permission(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            ptype: "p".to_string(),
            values: vec![subject.into(), object.into(), action.into()],
        }
    }

    /// `g, user, role`
    pub fn role(user: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            ptype: "g".to_string(),
            values: vec![user.into(), role.into()],
        }
    }

    #[must_use]
    pub fn section(&self) -> Section {
        if self.ptype.starts_with('g') {
            Section::G
        } else {
            Section::P
        }
    }

    /// Content-addressed document id: equal rules written by any replica land
    /// on the same document.
    #[must_use]
    pub fn document_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ptype.as_bytes());
        for value in &self.values {
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
        }
        format!("{RULE_ID_PREFIX}{}", hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ptype)?;
        for value in &self.values {
            write!(f, ", {value}")?;
        }
        Ok(())
    }
}

/// All rules, grouped by policy type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    rules: BTreeMap<String, BTreeSet<Vec<String>>>,
}

impl RuleTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the rule was already present.
    pub fn insert(&mut self, rule: PolicyRule) -> bool {
        self.rules.entry(rule.ptype).or_default().insert(rule.values)
    }

    /// Returns `false` if the rule was not present.
    pub fn remove(&mut self, rule: &PolicyRule) -> bool {
        let Some(set) = self.rules.get_mut(&rule.ptype) else {
            return false;
        };
        let removed = set.remove(&rule.values);
        if set.is_empty() {
            self.rules.remove(&rule.ptype);
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, rule: &PolicyRule) -> bool {
        self.rules
            .get(&rule.ptype)
            .is_some_and(|set| set.contains(&rule.values))
    }

    /// Values of every rule of one policy type.
    pub fn rules(&self, ptype: &str) -> impl Iterator<Item = &Vec<String>> {
        self.rules.get(ptype).into_iter().flatten()
    }

    /// Every rule in the table.
    pub fn iter(&self) -> impl Iterator<Item = PolicyRule> + '_ {
        self.rules.iter().flat_map(|(ptype, set)| {
            set.iter().map(move |values| PolicyRule {
                ptype: ptype.clone(),
                values: values.clone(),
            })
        })
    }

    /// Rules of `ptype` whose values, starting at `field_index`, equal
    /// `field_values`. An empty filter value matches anything.
    #[must_use]
    pub fn filtered(&self, ptype: &str, field_index: usize, field_values: &[&str]) -> Vec<Vec<String>> {
        self.rules(ptype)
            .filter(|values| matches_filter(values, field_index, field_values))
            .cloned()
            .collect()
    }

    /// Removes the rules [`filtered`](Self::filtered) would return.
    pub fn remove_filtered(
        &mut self,
        ptype: &str,
        field_index: usize,
        field_values: &[&str],
    ) -> Vec<PolicyRule> {
        let removed: Vec<PolicyRule> = self
            .filtered(ptype, field_index, field_values)
            .into_iter()
            .map(|values| PolicyRule::new(ptype, values))
            .collect();
        for rule in &removed {
            self.remove(rule);
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.values().map(BTreeSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<PolicyRule> for RuleTable {
    fn from_iter<T: IntoIterator<Item = PolicyRule>>(iter: T) -> Self {
        let mut table = Self::new();
        for rule in iter {
            table.insert(rule);
        }
        table
    }
}

fn matches_filter(values: &[String], field_index: usize, field_values: &[&str]) -> bool {
    field_values.iter().enumerate().all(|(offset, expected)| {
        expected.is_empty()
            || values
                .get(field_index + offset)
                .is_some_and(|value| value == expected)
    })
}
