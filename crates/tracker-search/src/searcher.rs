//! Authority-filtered search.
//!
//! Node documents carry only their ACL id. Visibility is resolved by first
//! finding the ACL documents that grant the authority read access, then
//! restricting the node search to those ACL ids.

use tracing::debug;

use crate::document::{DocType, IndexDocument};
use crate::error::SearchError;
use crate::facade::{IndexFacade, Predicate};

/// Upper bound on ACL documents considered for one authority.
const MAX_AUTHORISED_ACLS: usize = 100_000;

/// ACL ids whose readers contain `authority` and whose denied set does not.
pub fn authorised_acl_ids(
    facade: &dyn IndexFacade,
    authority: &str,
) -> Result<Vec<u64>, SearchError> {
    let predicate = Predicate::and([
        Predicate::DocType(DocType::Acl),
        Predicate::Reader(authority.to_string()),
        Predicate::not(Predicate::Denied(authority.to_string())),
    ]);
    let mut ids: Vec<u64> = facade
        .search(&predicate, MAX_AUTHORISED_ACLS)?
        .into_iter()
        .filter_map(|doc| doc.acl_id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Node documents matching `text` that `authority` may read.
pub fn authorised_search(
    facade: &dyn IndexFacade,
    text: &str,
    authority: &str,
    limit: usize,
) -> Result<Vec<IndexDocument>, SearchError> {
    let acl_ids = authorised_acl_ids(facade, authority)?;
    debug!(authority, acl_count = acl_ids.len(), "Resolved readable ACLs");
    if acl_ids.is_empty() {
        return Ok(Vec::new());
    }

    let predicate = Predicate::and([
        Predicate::DocType(DocType::Node),
        Predicate::Text(text.to_string()),
        Predicate::or(acl_ids.into_iter().map(Predicate::AclId)),
    ]);
    facade.search(&predicate, limit)
}
