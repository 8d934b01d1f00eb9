//! RBAC policy: rule model, persistence, enforcement and cross-replica
//! synchronization.
//!
//! # Architecture
//!
//! ```text
//!  replica A                      shared store                replica B
//!  Enforcer ──save──► PolicyAdapter ──► acl db ──changes──► PolicyWatcher
//!                                                               │ Changed
//!                                                               ▼
//!                                     Enforcer ◄──load── PolicyReloadService
//! ```
//!
//! Every replica owns one [`Enforcer`], one [`PolicyWatcher`] and one
//! [`PolicyReloadService`]; there is no coordinator. Replicas converge
//! because every reload is a full re-read of the stored rules.

pub mod adapter;
pub mod enforcer;
pub mod reload;
pub mod rule;
pub mod watcher;

pub use adapter::{DocumentPolicyAdapter, PolicyAdapter, SaveSummary};
pub use enforcer::{Enforcer, MAX_ROLE_DEPTH, PolicyTransaction, key_match};
pub use reload::{PolicyChange, PolicyChangeNotifier, PolicyReloadService, ReloadStats};
pub use rule::{PolicyRule, RuleTable, Section};
pub use watcher::{PolicyWatcher, WatcherStats};
