//! The lock manager.
//!
//! A token table and a path index behind one reader-writer lock.
//! Expired records are swept opportunistically on every mutating call;
//! readers simply skip them, so an expired lock is indistinguishable
//! from an absent one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;
use xmltree::Element;

use crate::davheaders::{ETag, IfCondition, IfItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("resource is locked")]
    Locked,
    #[error("no such lock")]
    NoSuchLock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfirmError {
    #[error("no if-list satisfied")]
    PreconditionFailed,
    #[error("missing lock token")]
    Locked,
}

/// An active write lock on a resource (or, at infinite depth, a subtree).
#[derive(Debug, Clone)]
pub struct LockRecord {
    /// Opaque token URI, unique for the lifetime of the server.
    pub token: String,
    /// The resource the lock was taken on.
    pub root: String,
    /// Client-supplied owner fragment, echoed in lockdiscovery.
    pub owner: Option<Element>,
    pub depth_infinity: bool,
    pub shared: bool,
    pub created: SystemTime,
    /// Zero means the lock never expires.
    pub timeout: Duration,
}

impl LockRecord {
    fn expired(&self, now: SystemTime) -> bool {
        self.timeout != Duration::ZERO
            && now
                .duration_since(self.created)
                .map(|age| age > self.timeout)
                .unwrap_or(false)
    }

    /// Does this lock protect `path`.
    pub fn covers(&self, path: &str) -> bool {
        if self.root == path {
            return true;
        }
        self.depth_infinity
            && (self.root == "/" || path.starts_with(&format!("{}/", self.root)))
    }
}

/// Parameters for a new lock.
#[derive(Debug, Clone, Default)]
pub struct LockParams {
    pub owner: Option<Element>,
    pub depth_infinity: bool,
    pub shared: bool,
    pub timeout: Duration,
}

/// One `If:` list with its tagged resource resolved to a server path.
#[derive(Debug, Clone)]
pub struct ResolvedList {
    pub path: String,
    pub conditions: Vec<IfCondition>,
}

#[derive(Default)]
struct Table {
    by_token: HashMap<String, LockRecord>,
    by_path: HashMap<String, Vec<String>>,
}

impl Table {
    fn sweep(&mut self, now: SystemTime) {
        let dead: Vec<String> = self
            .by_token
            .values()
            .filter(|rec| rec.expired(now))
            .map(|rec| rec.token.clone())
            .collect();
        for token in dead {
            self.drop_token(&token);
        }
    }

    fn drop_token(&mut self, token: &str) -> Option<LockRecord> {
        let rec = self.by_token.remove(token)?;
        if let Some(tokens) = self.by_path.get_mut(&rec.root) {
            tokens.retain(|t| t != token);
            if tokens.is_empty() {
                self.by_path.remove(&rec.root);
            }
        }
        Some(rec)
    }

    fn insert(&mut self, rec: LockRecord) {
        self.by_path
            .entry(rec.root.clone())
            .or_default()
            .push(rec.token.clone());
        self.by_token.insert(rec.token.clone(), rec);
    }

    fn active(&self, now: SystemTime) -> impl Iterator<Item = &LockRecord> {
        self.by_token.values().filter(move |rec| !rec.expired(now))
    }

    // The conflict rule: a new lock on `root` is refused when an
    // existing lock covers it (shared locks tolerate each other on the
    // same resource, and only an exclusive ancestor blocks), or when
    // the new lock would span an already locked descendant.
    fn conflicts(&self, now: SystemTime, root: &str, depth_infinity: bool, shared: bool) -> bool {
        self.active(now).any(|rec| {
            if rec.root == root {
                return !rec.shared || !shared;
            }
            if rec.covers(root) && !rec.shared {
                return true;
            }
            depth_infinity && is_descendant(&rec.root, root)
        })
    }
}

fn is_descendant(path: &str, root: &str) -> bool {
    root == "/" && path != "/" || path.starts_with(&format!("{root}/"))
}

/// The in-memory lock table. Shared by the handlers via `Arc`.
pub struct LockManager {
    table: RwLock<Table>,
}

impl LockManager {
    pub fn new() -> Arc<LockManager> {
        Arc::new(LockManager {
            table: RwLock::new(Table::default()),
        })
    }

    /// Take a new lock on `root`. Conflicting locks yield
    /// [`LockError::Locked`].
    pub fn lock(&self, root: &str, params: LockParams) -> Result<LockRecord, LockError> {
        let now = SystemTime::now();
        let mut table = self.table.write();
        table.sweep(now);
        if table.conflicts(now, root, params.depth_infinity, params.shared) {
            return Err(LockError::Locked);
        }
        let rec = LockRecord {
            token: format!("opaquelocktoken:{}", Uuid::new_v4()),
            root: root.to_string(),
            owner: params.owner,
            depth_infinity: params.depth_infinity,
            shared: params.shared,
            created: now,
            timeout: params.timeout,
        };
        table.insert(rec.clone());
        Ok(rec)
    }

    /// Refresh an existing lock: reset its creation instant and
    /// replace its timeout.
    pub fn refresh(&self, token: &str, timeout: Duration) -> Result<LockRecord, LockError> {
        let now = SystemTime::now();
        let mut table = self.table.write();
        table.sweep(now);
        let rec = table
            .by_token
            .get_mut(token)
            .ok_or(LockError::NoSuchLock)?;
        rec.created = now;
        rec.timeout = timeout;
        Ok(rec.clone())
    }

    /// Release a lock. The only failure is [`LockError::NoSuchLock`],
    /// for tokens that are unknown or already expired.
    pub fn unlock(&self, token: &str) -> Result<(), LockError> {
        let now = SystemTime::now();
        let mut table = self.table.write();
        table.sweep(now);
        table.drop_token(token).map(|_| ()).ok_or(LockError::NoSuchLock)
    }

    /// All active locks whose root covers `path`, for lockdiscovery.
    pub fn covering(&self, path: &str) -> Vec<LockRecord> {
        let now = SystemTime::now();
        let table = self.table.read();
        table
            .active(now)
            .filter(|rec| rec.covers(path))
            .cloned()
            .collect()
    }

    /// Evaluate a parsed `If:` header.
    ///
    /// `lists` is the OR of AND-lists, each already resolved to a
    /// server path; `etags` carries the current etag of every resource
    /// the lists tag. The first satisfied list must also supply the
    /// token of every lock covering `src` and `dst`, otherwise the
    /// request is refused as locked.
    pub fn confirm(
        &self,
        src: Option<&str>,
        dst: Option<&str>,
        lists: &[ResolvedList],
        etags: &HashMap<String, String>,
    ) -> Result<(), ConfirmError> {
        let now = SystemTime::now();
        let table = self.table.read();

        // Tokens are "submitted" by appearing anywhere in the header.
        let supplied: Vec<&str> = lists
            .iter()
            .flat_map(|list| list.conditions.iter())
            .filter(|cond| !cond.not)
            .filter_map(|cond| match &cond.item {
                IfItem::Token(token) => Some(token.as_str()),
                IfItem::ETag(_) => None,
            })
            .collect();

        for list in lists {
            let satisfied = list.conditions.iter().all(|cond| {
                let holds = match &cond.item {
                    IfItem::Token(token) => table
                        .by_token
                        .get(token)
                        .map(|rec| !rec.expired(now) && rec.covers(&list.path))
                        .unwrap_or(false),
                    IfItem::ETag(etag) => etags
                        .get(&list.path)
                        .map(|cur| etag.strong_eq(&ETag::strong(cur.clone())))
                        .unwrap_or(false),
                };
                holds != cond.not
            });
            if !satisfied {
                continue;
            }

            let covered = [src, dst].iter().flatten().all(|path| {
                table
                    .active(now)
                    .filter(|rec| rec.covers(path))
                    .all(|rec| supplied.contains(&rec.token.as_str()))
            });
            return if covered {
                Ok(())
            } else {
                Err(ConfirmError::Locked)
            };
        }
        Err(ConfirmError::PreconditionFailed)
    }
}

/// Releases temporary locks when the request is done, whichever way
/// it ends.
pub(crate) struct LockGuard {
    manager: Option<Arc<LockManager>>,
    tokens: Vec<String>,
}

impl LockGuard {
    pub fn none() -> LockGuard {
        LockGuard {
            manager: None,
            tokens: Vec::new(),
        }
    }

    pub fn new(manager: Arc<LockManager>, tokens: Vec<String>) -> LockGuard {
        LockGuard {
            manager: Some(manager),
            tokens,
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(manager) = &self.manager {
            for token in &self.tokens {
                let _ = manager.unlock(token);
            }
        }
    }
}
