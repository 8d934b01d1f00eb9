//! Persistence of the rule table as one document per rule.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use enseada_storage::FindQuery;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::rule::{PolicyRule, RuleTable, Section};
use crate::document::client::KIND_INDEX;
use crate::document::{DocumentGateway, DocumentKind, with_identity};
use crate::{AuthResult, Context};

/// Outcome of a full policy save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub created: usize,
    pub deleted: usize,
}

impl SaveSummary {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.deleted == 0
    }
}

/// Loads and saves the rule table consumed by the [`Enforcer`](super::Enforcer).
#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    /// Reads every rule.
    async fn load_policy(&self, ctx: &Context) -> AuthResult<RuleTable>;

    /// Replaces the stored rules with `table`: rules no longer present are
    /// deleted and missing ones created.
    ///
    /// Not atomic. On error the store holds some mix of the old and new
    /// rules; saving the same table again converges.
    async fn save_policy(&self, ctx: &Context, table: &RuleTable) -> AuthResult<SaveSummary>;

    /// Stores one rule. Storing an existing rule is a no-op.
    async fn add_policy(&self, ctx: &Context, rule: &PolicyRule) -> AuthResult<()>;

    /// Deletes one rule. Deleting a missing rule is a no-op.
    async fn remove_policy(&self, ctx: &Context, rule: &PolicyRule) -> AuthResult<()>;
}

/// Stored shape of a rule.
#[derive(Debug, Serialize, Deserialize)]
struct RuleDocument {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    kind: DocumentKind,
    section: Section,
    ptype: String,
    values: Vec<String>,
}

impl RuleDocument {
    fn from_rule(rule: &PolicyRule) -> Self {
        Self {
            id: None,
            rev: None,
            kind: DocumentKind::PolicyRule,
            section: rule.section(),
            ptype: rule.ptype.clone(),
            values: rule.values.clone(),
        }
    }

    fn into_rule(self) -> PolicyRule {
        PolicyRule {
            ptype: self.ptype,
            values: self.values,
        }
    }
}

/// [`PolicyAdapter`] over the acl database.
#[derive(Debug, Clone)]
pub struct DocumentPolicyAdapter {
    gateway: DocumentGateway,
}

impl DocumentPolicyAdapter {
    pub fn new(gateway: DocumentGateway) -> Self {
        Self { gateway }
    }

    async fn stored(&self, ctx: &Context) -> AuthResult<Vec<RuleDocument>> {
        let query = FindQuery::new(json!({ "kind": DocumentKind::PolicyRule.as_str() }))
            .use_index(KIND_INDEX);
        self.gateway
            .find_all(ctx, query)
            .await?
            .into_iter()
            .map(|doc| Ok(serde_json::from_value(doc)?))
            .collect()
    }

    /// Returns `true` if this call created the document.
    async fn create(&self, ctx: &Context, rule: &PolicyRule) -> AuthResult<bool> {
        let id = rule.document_id();
        let body = with_identity(serde_json::to_value(RuleDocument::from_rule(rule))?, &id, None)?;
        match self.gateway.put(ctx, &id, body).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_conflict() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Returns `true` if this call deleted the document.
    async fn delete(&self, ctx: &Context, id: &str, rev: &str) -> AuthResult<bool> {
        match self.gateway.delete(ctx, id, rev).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() || err.is_conflict() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl PolicyAdapter for DocumentPolicyAdapter {
    async fn load_policy(&self, ctx: &Context) -> AuthResult<RuleTable> {
        let table: RuleTable = self
            .stored(ctx)
            .await?
            .into_iter()
            .map(RuleDocument::into_rule)
            .collect();
        tracing::debug!(rules = table.len(), "loaded policy");
        Ok(table)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(rules = table.len()))]
    async fn save_policy(&self, ctx: &Context, table: &RuleTable) -> AuthResult<SaveSummary> {
        let wanted: HashMap<String, PolicyRule> =
            table.iter().map(|rule| (rule.document_id(), rule)).collect();

        let mut summary = SaveSummary::default();
        let mut present = HashSet::new();
        for doc in self.stored(ctx).await? {
            let (Some(id), Some(rev)) = (doc.id, doc.rev) else {
                continue;
            };
            if wanted.contains_key(&id) {
                present.insert(id);
            } else if self.delete(ctx, &id, &rev).await? {
                summary.deleted += 1;
            }
        }

        for (id, rule) in &wanted {
            if present.contains(id) {
                continue;
            }
            if self.create(ctx, rule).await? {
                summary.created += 1;
            }
        }

        tracing::debug!(created = summary.created, deleted = summary.deleted, "saved policy");
        Ok(summary)
    }

    async fn add_policy(&self, ctx: &Context, rule: &PolicyRule) -> AuthResult<()> {
        self.create(ctx, rule).await?;
        Ok(())
    }

    async fn remove_policy(&self, ctx: &Context, rule: &PolicyRule) -> AuthResult<()> {
        let id = rule.document_id();
        if let Some(rev) = self.gateway.current_rev(ctx, &id).await? {
            self.delete(ctx, &id, &rev).await?;
        }
        Ok(())
    }
}
