//! ACL change-log entries.
//!
//! An [`AclChangeSet`] groups the ACLs modified by one repository commit.
//! Each [`Acl`] resolves to an [`AclReaders`] record holding the principals
//! allowed and denied read access.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::node::DEFAULT_TENANT;

/// A batch of ACL mutations committed together by the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclChangeSet {
    /// Strictly increasing change set id
    pub id: u64,
    /// Repository commit time in milliseconds since epoch
    pub commit_time_ms: u64,
    /// Number of ACLs the change set touched
    pub acl_count: usize,
}

impl AclChangeSet {
    pub fn new(id: u64, commit_time_ms: u64, acl_count: usize) -> Self {
        Self {
            id,
            commit_time_ms,
            acl_count,
        }
    }
}

/// An ACL owned by a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    pub change_set_id: u64,
    pub acl_id: u64,
}

impl Acl {
    pub fn new(change_set_id: u64, acl_id: u64) -> Self {
        Self {
            change_set_id,
            acl_id,
        }
    }
}

/// Resolved reader and denied principals of one ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclReaders {
    pub acl_id: u64,
    pub readers: BTreeSet<String>,
    pub denied: BTreeSet<String>,
    pub tenant: String,
}

impl AclReaders {
    /// Create a readers record for the default tenant.
    pub fn new<R, D>(acl_id: u64, readers: R, denied: D) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            acl_id,
            readers: readers.into_iter().map(Into::into).collect(),
            denied: denied.into_iter().map(Into::into).collect(),
            tenant: DEFAULT_TENANT.to_string(),
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    /// Whether `authority` may read documents guarded by this ACL.
    ///
    /// A denial always wins over a grant.
    pub fn permits(&self, authority: &str) -> bool {
        self.readers.contains(authority) && !self.denied.contains(authority)
    }
}
