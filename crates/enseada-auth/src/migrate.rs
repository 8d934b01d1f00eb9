//! Database and index bootstrap.
//!
//! Lookups by correlation key rely on these indexes; without them the store
//! falls back to full scans. Safe to run on every start.

use enseada_storage::{DynDocumentStore, IndexDefinition};

use crate::config::DatabaseNames;
use crate::document::DocumentGateway;
use crate::document::client::KIND_INDEX;
use crate::document::oidc::AUTH_CODE_INDEX;
use crate::document::request::{REQUESTED_AT_INDEX, REQUEST_ID_INDEX, SIGNATURE_INDEX};
use crate::{AuthResult, Context};

/// Indexes of the oauth database.
#[must_use]
pub fn oauth_indexes() -> Vec<IndexDefinition> {
    vec![
        IndexDefinition::new(KIND_INDEX).field("kind"),
        IndexDefinition::new(REQUEST_ID_INDEX).field("req.id"),
        IndexDefinition::new(REQUESTED_AT_INDEX).field_desc("req.requested_at"),
        IndexDefinition::new(SIGNATURE_INDEX).field("sig"),
        IndexDefinition::new(AUTH_CODE_INDEX).field("auth_code"),
    ]
}

/// Creates the databases and indexes the authorization core needs.
#[tracing::instrument(skip_all)]
pub async fn run(
    ctx: &Context,
    store: &DynDocumentStore,
    databases: &DatabaseNames,
) -> AuthResult<()> {
    let plan = [
        (&databases.acl, vec![IndexDefinition::new(KIND_INDEX).field("kind")]),
        (&databases.oauth, oauth_indexes()),
        (&databases.users, vec![IndexDefinition::new(KIND_INDEX).field("kind")]),
    ];

    for (db, indexes) in plan {
        let gateway = DocumentGateway::new(store.clone(), db, None);
        if gateway.call(ctx, store.create_database(db)).await? {
            tracing::info!(db = %db, "created database");
        }
        for index in &indexes {
            gateway.call(ctx, store.create_index(db, index)).await?;
            tracing::debug!(db = %db, index = %index.name, "ensured index");
        }
    }
    Ok(())
}
