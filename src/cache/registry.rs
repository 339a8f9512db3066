//! Bypass registry.
//!
//! Holds the configured set of bypass query names and, once written, the
//! verbatim entry stored for each of them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::OverwritePolicy;
use super::lock::{rw_read, rw_write};
use super::query::{ArgumentSet, QueryIdentity};

const SOURCE: &str = "cache::registry";

/// A query result kept verbatim together with the arguments it was
/// produced for.
///
/// The result is shared, so serving it never copies the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassEntry {
    pub result: Arc<Value>,
    pub arguments: ArgumentSet,
}

/// Proof that an identity is registered for bypass.
///
/// Only [`BypassRegistry::registration`] hands these out, so an entry can
/// never be stored under an unregistered name.
#[derive(Debug, Clone, Copy)]
pub struct Registration<'a> {
    identity: &'a QueryIdentity,
}

impl<'a> Registration<'a> {
    pub fn identity(&self) -> &'a QueryIdentity {
        self.identity
    }
}

/// What [`BypassRegistry::store`] did with a write.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    /// No entry existed for the identity.
    Inserted,
    /// An existing entry was replaced.
    Replaced,
    /// An entry with different arguments exists and the policy keeps it.
    /// The result is handed back untouched.
    Rejected { result: Value },
}

impl StoreOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Registered bypass names and their stored entries.
pub struct BypassRegistry {
    names: BTreeSet<QueryIdentity>,
    policy: OverwritePolicy,
    entries: RwLock<BTreeMap<QueryIdentity, BypassEntry>>,
}

impl BypassRegistry {
    /// Create a registry for the given names. Duplicate names collapse.
    pub fn new<I, N>(names: I, policy: OverwritePolicy) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<QueryIdentity>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            policy,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &QueryIdentity> {
        self.names.iter()
    }

    pub fn policy(&self) -> OverwritePolicy {
        self.policy
    }

    /// True iff `identity` is present and one of the configured names.
    pub fn is_registered(&self, identity: Option<&QueryIdentity>) -> bool {
        self.registration(identity).is_some()
    }

    /// Obtain the registration token for `identity`, if it is registered.
    pub fn registration<'a>(
        &'a self,
        identity: Option<&QueryIdentity>,
    ) -> Option<Registration<'a>> {
        identity
            .and_then(|identity| self.names.get(identity))
            .map(|identity| Registration { identity })
    }

    /// True iff an entry is stored for `identity` with arguments equal to
    /// `arguments`.
    pub fn matches(&self, identity: Option<&QueryIdentity>, arguments: &ArgumentSet) -> bool {
        self.lookup(identity, arguments).is_some()
    }

    /// The stored result for `identity`, if its arguments equal `arguments`.
    pub fn lookup(
        &self,
        identity: Option<&QueryIdentity>,
        arguments: &ArgumentSet,
    ) -> Option<Arc<Value>> {
        let registration = self.registration(identity)?;
        rw_read(&self.entries, SOURCE, "lookup")
            .get(registration.identity)
            .filter(|entry| entry.arguments == *arguments)
            .map(|entry| Arc::clone(&entry.result))
    }

    /// Store `result` for a registered identity, subject to the overwrite
    /// policy.
    ///
    /// The policy check and the insert happen under one write lock.
    pub fn store(
        &self,
        registration: Registration<'_>,
        result: Value,
        arguments: ArgumentSet,
    ) -> StoreOutcome {
        let mut entries = rw_write(&self.entries, SOURCE, "store");
        let outcome = match entries.get(registration.identity) {
            None => StoreOutcome::Inserted,
            Some(existing)
                if self.policy == OverwritePolicy::FirstWriteWins
                    && existing.arguments != arguments =>
            {
                return StoreOutcome::Rejected { result };
            }
            Some(_) => StoreOutcome::Replaced,
        };
        entries.insert(
            registration.identity.clone(),
            BypassEntry {
                result: Arc::new(result),
                arguments,
            },
        );
        outcome
    }

    /// Copy of every stored entry.
    pub fn entries(&self) -> BTreeMap<QueryIdentity, BypassEntry> {
        rw_read(&self.entries, SOURCE, "entries").clone()
    }

    pub fn entry(&self, identity: &QueryIdentity) -> Option<BypassEntry> {
        rw_read(&self.entries, SOURCE, "entry").get(identity).cloned()
    }

    /// Replace all entries, keeping only registered identities.
    ///
    /// Returns the identities that were dropped.
    pub fn replace_entries(
        &self,
        entries: BTreeMap<QueryIdentity, BypassEntry>,
    ) -> Vec<QueryIdentity> {
        let (kept, dropped): (BTreeMap<_, _>, BTreeMap<_, _>) = entries
            .into_iter()
            .partition(|(identity, _)| self.names.contains(identity));
        *rw_write(&self.entries, SOURCE, "replace_entries") = kept;
        dropped.into_keys().collect()
    }

    /// Remove every stored entry. Names are kept.
    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
