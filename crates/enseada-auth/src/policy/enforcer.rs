//! RBAC enforcer over an in-memory rule table.
//!
//! Model:
//!
//! ```text
//! r = sub, obj, act
//! p = sub, obj, act
//! g = _, _
//! m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && (r.act == p.act || p.act == "*")
//! ```
//!
//! `keyMatch` treats `*` in the policy object as a wildcard for any run of
//! characters. Role inheritance is transitive up to [`MAX_ROLE_DEPTH`].
//!
//! Enforcement only reads the table. Mutations persist through the
//! [`PolicyAdapter`] first (when auto-save is on), then update the table and
//! emit one [`PolicyChange::Saved`] notification.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::adapter::{PolicyAdapter, SaveSummary};
use super::reload::{PolicyChange, PolicyChangeNotifier};
use super::rule::{PolicyRule, RuleTable};
use crate::{AuthResult, Context};

/// Maximum depth of role inheritance followed by `g(r.sub, p.sub)`.
pub const MAX_ROLE_DEPTH: usize = 10;

const PERMISSION: &str = "p";
const GROUPING: &str = "g";
const ANY_ACTION: &str = "*";

pub struct Enforcer {
    adapter: Arc<dyn PolicyAdapter>,
    table: RwLock<RuleTable>,
    auto_save: AtomicBool,
    notifier: RwLock<Option<Arc<PolicyChangeNotifier>>>,
    /// Serializes mutations and reloads so a reload never interleaves with
    /// a persist-then-apply sequence.
    write_lock: tokio::sync::Mutex<()>,
}

impl Enforcer {
    /// Creates an enforcer with an empty table and auto-save enabled.
    pub fn new(adapter: Arc<dyn PolicyAdapter>) -> Self {
        Self {
            adapter,
            table: RwLock::new(RuleTable::new()),
            auto_save: AtomicBool::new(true),
            notifier: RwLock::new(None),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_notifier(self, notifier: Arc<PolicyChangeNotifier>) -> Self {
        self.set_notifier(notifier);
        self
    }

    pub fn set_notifier(&self, notifier: Arc<PolicyChangeNotifier>) {
        *self.notifier.write() = Some(notifier);
    }

    /// With auto-save off, mutations only change the in-memory table until
    /// [`save_policy`](Self::save_policy) is called.
    pub fn enable_auto_save(&self, enabled: bool) {
        self.auto_save.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_auto_save_enabled(&self) -> bool {
        self.auto_save.load(Ordering::Relaxed)
    }

    /// Copy of the current rule table.
    #[must_use]
    pub fn snapshot(&self) -> RuleTable {
        self.table.read().clone()
    }

    // -------------------------------------------------------------------------
    // Enforcement
    // -------------------------------------------------------------------------

    /// Whether `subject` may perform `action` on `object`.
    #[must_use]
    pub fn enforce(&self, subject: &str, object: &str, action: &str) -> bool {
        let table = self.table.read();
        let mut subjects = implicit_roles(&table, subject);
        subjects.insert(subject.to_string());

        table.rules(PERMISSION).any(|p| match p.as_slice() {
            [sub, obj, act, ..] => {
                subjects.contains(sub)
                    && key_match(object, obj)
                    && (act == action || act == ANY_ACTION)
            }
            _ => false,
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Permissions granted directly to `user`.
    #[must_use]
    pub fn get_permissions_for_user(&self, user: &str) -> Vec<Vec<String>> {
        self.table.read().filtered(PERMISSION, 0, &[user])
    }

    #[must_use]
    pub fn has_permission_for_user(&self, user: &str, object: &str, action: &str) -> bool {
        self.table
            .read()
            .contains(&PolicyRule::permission(user, object, action))
    }

    /// Roles assigned directly to `user`.
    #[must_use]
    pub fn get_roles_for_user(&self, user: &str) -> Vec<String> {
        self.table
            .read()
            .filtered(GROUPING, 0, &[user])
            .into_iter()
            .filter_map(|values| values.into_iter().nth(1))
            .collect()
    }

    /// Users (or roles) assigned `role` directly.
    #[must_use]
    pub fn get_users_for_role(&self, role: &str) -> Vec<String> {
        self.table
            .read()
            .filtered(GROUPING, 1, &[role])
            .into_iter()
            .filter_map(|values| values.into_iter().next())
            .collect()
    }

    /// Direct and inherited roles of `user`, nearest first.
    #[must_use]
    pub fn get_implicit_roles_for_user(&self, user: &str) -> Vec<String> {
        let table = self.table.read();
        role_closure(&table, user)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Returns `false` if the rule already existed.
    pub async fn add_policy(&self, ctx: &Context, rule: PolicyRule) -> AuthResult<bool> {
        let _guard = self.write_lock.lock().await;
        if self.table.read().contains(&rule) {
            return Ok(false);
        }
        if self.is_auto_save_enabled() {
            self.adapter.add_policy(ctx, &rule).await?;
        }
        self.table.write().insert(rule);
        self.notify_saved();
        Ok(true)
    }

    /// Returns `false` if the rule did not exist.
    pub async fn remove_policy(&self, ctx: &Context, rule: PolicyRule) -> AuthResult<bool> {
        let _guard = self.write_lock.lock().await;
        if !self.table.read().contains(&rule) {
            return Ok(false);
        }
        if self.is_auto_save_enabled() {
            self.adapter.remove_policy(ctx, &rule).await?;
        }
        self.table.write().remove(&rule);
        self.notify_saved();
        Ok(true)
    }

    pub async fn add_permission_for_user(
        &self,
        ctx: &Context,
        user: &str,
        object: &str,
        action: &str,
    ) -> AuthResult<bool> {
        self.add_policy(ctx, PolicyRule::permission(user, object, action))
            .await
    }

    pub async fn delete_permission_for_user(
        &self,
        ctx: &Context,
        user: &str,
        object: &str,
        action: &str,
    ) -> AuthResult<bool> {
        self.remove_policy(ctx, PolicyRule::permission(user, object, action))
            .await
    }

    /// Removes every permission granted directly to `user`.
    pub async fn delete_permissions_for_user(&self, ctx: &Context, user: &str) -> AuthResult<bool> {
        let _guard = self.write_lock.lock().await;
        let doomed: Vec<PolicyRule> = self
            .table
            .read()
            .filtered(PERMISSION, 0, &[user])
            .into_iter()
            .map(|values| PolicyRule::new(PERMISSION, values))
            .collect();
        if doomed.is_empty() {
            return Ok(false);
        }
        if self.is_auto_save_enabled() {
            for rule in &doomed {
                self.adapter.remove_policy(ctx, rule).await?;
            }
        }
        {
            let mut table = self.table.write();
            for rule in &doomed {
                table.remove(rule);
            }
        }
        self.notify_saved();
        Ok(true)
    }

    pub async fn add_role_for_user(&self, ctx: &Context, user: &str, role: &str) -> AuthResult<bool> {
        self.add_policy(ctx, PolicyRule::role(user, role)).await
    }

    pub async fn delete_role_for_user(
        &self,
        ctx: &Context,
        user: &str,
        role: &str,
    ) -> AuthResult<bool> {
        self.remove_policy(ctx, PolicyRule::role(user, role)).await
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Replaces the table with the stored rules.
    pub async fn load_policy(&self, ctx: &Context) -> AuthResult<()> {
        let _guard = self.write_lock.lock().await;
        let table = self.adapter.load_policy(ctx).await?;
        let rules = table.len();
        *self.table.write() = table;
        tracing::debug!(rules, "policy table loaded");
        Ok(())
    }

    /// Writes the whole table through the adapter.
    pub async fn save_policy(&self, ctx: &Context) -> AuthResult<SaveSummary> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.snapshot();
        let summary = self.adapter.save_policy(ctx, &snapshot).await?;
        self.notify_saved();
        Ok(summary)
    }

    /// Applies a batch of mutations as one state transition.
    ///
    /// The closure stages changes on a copy of the table. If it returns `Ok`
    /// and changed anything, the copy is saved once (when auto-save is on),
    /// swapped in, and a single [`PolicyChange::Saved`] is emitted. If it
    /// returns `Err`, nothing is persisted or applied.
    ///
    /// The save itself is not atomic across documents: if it fails partway,
    /// the store may hold part of the batch while the in-memory table is left
    /// unchanged. Rerunning the same batch converges.
    pub async fn transaction<F, T>(&self, ctx: &Context, f: F) -> AuthResult<T>
    where
        F: FnOnce(&mut PolicyTransaction<'_>) -> AuthResult<T> + Send,
        T: Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut staged = self.snapshot();
        let (output, changed) = {
            let mut tx = PolicyTransaction {
                table: &mut staged,
                changed: false,
            };
            let output = f(&mut tx)?;
            (output, tx.changed)
        };
        if !changed {
            return Ok(output);
        }

        if self.is_auto_save_enabled() {
            let summary = self.adapter.save_policy(ctx, &staged).await?;
            tracing::debug!(
                created = summary.created,
                deleted = summary.deleted,
                "policy transaction saved"
            );
        }
        *self.table.write() = staged;
        self.notify_saved();
        Ok(output)
    }

    fn notify_saved(&self) {
        if let Some(notifier) = self.notifier.read().as_ref() {
            notifier.notify(PolicyChange::Saved);
        }
    }
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("rules", &self.table.read().len())
            .field("auto_save", &self.is_auto_save_enabled())
            .finish_non_exhaustive()
    }
}

/// Staged mutations inside [`Enforcer::transaction`].
pub struct PolicyTransaction<'a> {
    table: &'a mut RuleTable,
    changed: bool,
}

impl PolicyTransaction<'_> {
    pub fn add_policy(&mut self, rule: PolicyRule) -> bool {
        let added = self.table.insert(rule);
        self.changed |= added;
        added
    }

    pub fn remove_policy(&mut self, rule: &PolicyRule) -> bool {
        let removed = self.table.remove(rule);
        self.changed |= removed;
        removed
    }

    pub fn add_permission_for_user(&mut self, user: &str, object: &str, action: &str) -> bool {
        self.add_policy(PolicyRule::permission(user, object, action))
    }

    pub fn delete_permission_for_user(&mut self, user: &str, object: &str, action: &str) -> bool {
        self.remove_policy(&PolicyRule::permission(user, object, action))
    }

    pub fn delete_permissions_for_user(&mut self, user: &str) -> bool {
        let removed = !self
            .table
            .remove_filtered(PERMISSION, 0, &[user])
            .is_empty();
        self.changed |= removed;
        removed
    }

    pub fn add_role_for_user(&mut self, user: &str, role: &str) -> bool {
        self.add_policy(PolicyRule::role(user, role))
    }

    pub fn delete_role_for_user(&mut self, user: &str, role: &str) -> bool {
        self.remove_policy(&PolicyRule::role(user, role))
    }

    /// The staged table.
    #[must_use]
    pub fn table(&self) -> &RuleTable {
        self.table
    }
}

fn role_closure(table: &RuleTable, user: &str) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::from([user]);
    let mut ordered = Vec::new();
    let mut queue = VecDeque::from([(user, 0usize)]);

    while let Some((name, depth)) = queue.pop_front() {
        if depth >= MAX_ROLE_DEPTH {
            continue;
        }
        for values in table.rules(GROUPING) {
            if let [member, role, ..] = values.as_slice() {
                if member == name && seen.insert(role.as_str()) {
                    ordered.push(role.clone());
                    queue.push_back((role.as_str(), depth + 1));
                }
            }
        }
    }
    ordered
}

fn implicit_roles(table: &RuleTable, user: &str) -> HashSet<String> {
    role_closure(table, user).into_iter().collect()
}

/// `*` in `pattern` matches any run of characters, including none.
#[must_use]
pub fn key_match(key: &str, pattern: &str) -> bool {
    let key = key.as_bytes();
    let pattern = pattern.as_bytes();
    let (mut k, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, k));
            p += 1;
        } else if p < pattern.len() && pattern[p] == key[k] {
            k += 1;
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            k = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::AuthError;

    #[derive(Default)]
    struct RecordingAdapter {
        stored: parking_lot::Mutex<RuleTable>,
        saves: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl PolicyAdapter for RecordingAdapter {
        async fn load_policy(&self, _ctx: &Context) -> AuthResult<RuleTable> {
            Ok(self.stored.lock().clone())
        }

        async fn save_policy(&self, _ctx: &Context, table: &RuleTable) -> AuthResult<SaveSummary> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuthError::storage("simulated failure"));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.stored.lock() = table.clone();
            Ok(SaveSummary::default())
        }

        async fn add_policy(&self, _ctx: &Context, rule: &PolicyRule) -> AuthResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuthError::storage("simulated failure"));
            }
            self.stored.lock().insert(rule.clone());
            Ok(())
        }

        async fn remove_policy(&self, _ctx: &Context, rule: &PolicyRule) -> AuthResult<()> {
            self.stored.lock().remove(rule);
            Ok(())
        }
    }

    fn enforcer() -> (Arc<RecordingAdapter>, Enforcer) {
        let adapter = Arc::new(RecordingAdapter::default());
        let enforcer = Enforcer::new(adapter.clone());
        (adapter, enforcer)
    }

    #[test]
    fn test_key_match() {
        assert!(key_match("res:1", "res:1"));
        assert!(key_match("res:1", "res:*"));
        assert!(key_match("res:1", "*"));
        assert!(key_match("/repos/maven/org/x", "/repos/*/org/*"));
        assert!(key_match("abc", "a*b*c"));
        assert!(!key_match("res:1", "res:2"));
        assert!(!key_match("res", "res:*"));
        assert!(!key_match("xres:1", "res:*"));
    }

    #[tokio::test]
    async fn test_enforce_direct_wildcard_and_roles() {
        let (_, enforcer) = enforcer();
        let ctx = Context::background();
        enforcer
            .add_permission_for_user(&ctx, "bob", "res:1", "read")
            .await
            .unwrap();
        enforcer
            .add_permission_for_user(&ctx, "admin", "res:*", "*")
            .await
            .unwrap();
        enforcer.add_role_for_user(&ctx, "alice", "ops").await.unwrap();
        enforcer.add_role_for_user(&ctx, "ops", "admin").await.unwrap();

        assert!(enforcer.enforce("bob", "res:1", "read"));
        assert!(!enforcer.enforce("bob", "res:1", "write"));
        assert!(!enforcer.enforce("bob", "res:2", "read"));
        assert!(enforcer.enforce("alice", "res:42", "delete"));
        assert!(enforcer.enforce("admin", "res:1", "write"));
        assert!(!enforcer.enforce("carol", "res:1", "read"));

        assert_eq!(enforcer.get_roles_for_user("alice"), vec!["ops"]);
        assert_eq!(enforcer.get_implicit_roles_for_user("alice"), vec!["ops", "admin"]);
        assert_eq!(enforcer.get_users_for_role("admin"), vec!["ops"]);
    }

    #[tokio::test]
    async fn test_role_depth_is_bounded() {
        let (_, enforcer) = enforcer();
        let ctx = Context::background();
        for i in 0..12 {
            enforcer
                .add_role_for_user(&ctx, &format!("r{i}"), &format!("r{}", i + 1))
                .await
                .unwrap();
        }
        enforcer
            .add_permission_for_user(&ctx, "r10", "x", "read")
            .await
            .unwrap();
        enforcer
            .add_permission_for_user(&ctx, "r11", "y", "read")
            .await
            .unwrap();

        assert!(enforcer.enforce("r0", "x", "read"));
        assert!(!enforcer.enforce("r0", "y", "read"));
        assert_eq!(enforcer.get_implicit_roles_for_user("r0").len(), MAX_ROLE_DEPTH);
    }

    #[tokio::test]
    async fn test_role_cycles_terminate() {
        let (_, enforcer) = enforcer();
        let ctx = Context::background();
        enforcer.add_role_for_user(&ctx, "a", "b").await.unwrap();
        enforcer.add_role_for_user(&ctx, "b", "a").await.unwrap();
        assert_eq!(enforcer.get_implicit_roles_for_user("a"), vec!["b"]);
        assert!(!enforcer.enforce("a", "x", "y"));
    }

    #[tokio::test]
    async fn test_mutations_persist_and_notify() {
        let (adapter, enforcer) = enforcer();
        let notifier = Arc::new(PolicyChangeNotifier::new(16));
        let mut rx = notifier.subscribe();
        let enforcer = enforcer.with_notifier(notifier);
        let ctx = Context::background();

        assert!(enforcer
            .add_permission_for_user(&ctx, "bob", "res:1", "read")
            .await
            .unwrap());
        assert!(!enforcer
            .add_permission_for_user(&ctx, "bob", "res:1", "read")
            .await
            .unwrap());
        assert_eq!(rx.recv().await.unwrap(), PolicyChange::Saved);
        assert!(rx.try_recv().is_err());
        assert_eq!(adapter.stored.lock().len(), 1);

        assert!(enforcer.has_permission_for_user("bob", "res:1", "read"));
        assert!(enforcer.delete_permissions_for_user(&ctx, "bob").await.unwrap());
        assert!(adapter.stored.lock().is_empty());
        assert!(enforcer.get_permissions_for_user("bob").is_empty());
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_table_untouched() {
        let (adapter, enforcer) = enforcer();
        adapter.fail.store(true, Ordering::SeqCst);
        let ctx = Context::background();
        assert!(enforcer
            .add_permission_for_user(&ctx, "bob", "res:1", "read")
            .await
            .is_err());
        assert!(!enforcer.enforce("bob", "res:1", "read"));
    }

    #[tokio::test]
    async fn test_transaction_saves_and_notifies_once() {
        let (adapter, enforcer) = enforcer();
        let notifier = Arc::new(PolicyChangeNotifier::new(16));
        let mut rx = notifier.subscribe();
        let enforcer = enforcer.with_notifier(notifier);
        let ctx = Context::background();

        let added = enforcer
            .transaction(&ctx, |tx| {
                let mut added = 0;
                for i in 0..5 {
                    if tx.add_permission_for_user("bob", &format!("res:{i}"), "read") {
                        added += 1;
                    }
                }
                Ok(added)
            })
            .await
            .unwrap();

        assert_eq!(added, 5);
        assert_eq!(adapter.saves.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.unwrap(), PolicyChange::Saved);
        assert!(rx.try_recv().is_err());
        assert!(enforcer.enforce("bob", "res:3", "read"));
    }

    #[tokio::test]
    async fn test_failed_transaction_applies_nothing() {
        let (adapter, enforcer) = enforcer();
        let ctx = Context::background();

        let result: AuthResult<()> = enforcer
            .transaction(&ctx, |tx| {
                tx.add_permission_for_user("bob", "res:1", "read");
                Err(AuthError::validation("abort"))
            })
            .await;
        assert!(result.is_err());
        assert!(!enforcer.enforce("bob", "res:1", "read"));
        assert_eq!(adapter.saves.load(Ordering::SeqCst), 0);

        let unchanged = enforcer.transaction(&ctx, |_| Ok(())).await;
        assert!(unchanged.is_ok());
        assert_eq!(adapter.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auto_save_off_defers_to_save_policy() {
        let (adapter, enforcer) = enforcer();
        let ctx = Context::background();
        enforcer.enable_auto_save(false);
        enforcer.add_role_for_user(&ctx, "bob", "admin").await.unwrap();
        assert!(adapter.stored.lock().is_empty());

        enforcer.save_policy(&ctx).await.unwrap();
        assert_eq!(adapter.stored.lock().len(), 1);

        adapter.stored.lock().insert(PolicyRule::role("eve", "admin"));
        enforcer.load_policy(&ctx).await.unwrap();
        assert_eq!(enforcer.get_users_for_role("admin").len(), 2);
    }
}
