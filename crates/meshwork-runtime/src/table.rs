//! Copy-on-write child tables keyed by URI
//!
//! Every mutation snapshots the table, builds a new map and publishes it
//! with a compare-and-swap against the snapshot, retrying on contention.

use std::collections::BTreeMap;
use std::sync::Arc;

use meshwork_core::{activate, CasCell, TierStatus, Uri};

use crate::tier::{same_tier, TierBinding};

pub type TierMap<B> = BTreeMap<Uri, Arc<B>>;

/// Insert `binding` under `key` unless an entry already exists
///
/// `wire` runs at most once, before the first insertion attempt. If the key
/// is taken (either up front or after losing a race) the offered binding is
/// closed and the existing entry returned. A newly inserted entry is driven
/// through every phase `parent` has reached.
pub(crate) fn open_entry<B>(
    table: &CasCell<TierMap<B>>,
    key: &Uri,
    binding: Arc<B>,
    parent: &TierStatus,
    wire: impl Fn(Arc<B>) -> Arc<B>,
) -> Arc<B>
where
    B: TierBinding + ?Sized,
{
    let mut wired: Option<Arc<B>> = None;
    loop {
        let old = table.load();
        if let Some(existing) = old.get(key) {
            let loser = wired.unwrap_or(binding);
            if !same_tier(&loser, existing) {
                discard(&*loser);
            }
            return existing.clone();
        }
        let entry = match &wired {
            Some(entry) => entry.clone(),
            None => {
                let entry = wire(binding.clone());
                wired = Some(entry.clone());
                entry
            }
        };
        let mut new = (*old).clone();
        new.insert(key.clone(), entry.clone());
        if table.compare_and_swap(&old, new) {
            if let Err(error) = activate(parent.state(), &*entry) {
                entry.did_fail(error);
            }
            return entry;
        }
    }
}

/// Remove the entry under `key`, returning it so the caller can close it
pub(crate) fn close_entry<B: ?Sized>(table: &CasCell<TierMap<B>>, key: &Uri) -> Option<Arc<B>> {
    loop {
        let old = table.load();
        let entry = old.get(key)?.clone();
        let mut new = (*old).clone();
        new.remove(key);
        if table.compare_and_swap(&old, new) {
            return Some(entry);
        }
    }
}

/// Close a binding that lost a creation race
pub(crate) fn discard<B: TierBinding + ?Sized>(binding: &B) {
    if let Err(error) = binding.close() {
        tracing::debug!(%error, "discarded binding failed to close");
    }
}
