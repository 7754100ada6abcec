//! Persistence of tracker high-water marks as singleton index documents.

use tracker_search::{IndexDocument, IndexFacade};
use tracker_types::{TrackerKind, TrackerState};

use crate::error::TrackerError;

/// Load the last durably committed state of a tracker.
///
/// Trackers without a persisted state, and trackers that never committed,
/// start from an empty state.
pub fn load_state(facade: &dyn IndexFacade, kind: TrackerKind) -> Result<TrackerState, TrackerError> {
    let Some(key) = kind.state_key() else {
        return Ok(TrackerState::new());
    };
    Ok(facade
        .get(key)?
        .map(|doc| doc.to_tracker_state())
        .unwrap_or_default())
}

/// Queue the state document for the next commit.
pub fn write_state(
    facade: &dyn IndexFacade,
    kind: TrackerKind,
    state: &TrackerState,
) -> Result<(), TrackerError> {
    let key = kind.state_key().ok_or_else(|| {
        TrackerError::IllegalState(format!("{} tracker has no persisted state", kind))
    })?;
    facade.add_or_update(&IndexDocument::state(key, state))?;
    Ok(())
}

/// Whether log entry `id` is covered by the committed high-water mark.
pub fn is_committed(facade: &dyn IndexFacade, kind: TrackerKind, id: u64) -> Result<bool, TrackerError> {
    let state = load_state(facade, kind)?;
    Ok(state.last_indexed_id != 0 && id <= state.last_indexed_id)
}
