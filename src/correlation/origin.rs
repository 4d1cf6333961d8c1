// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resolution of a return's original purchase.

use super::CorrelationStore;
use crate::metrics;
use crate::record::TransactionRecord;
use crate::store::TransactionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Whether a return's original purchase was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginStatus {
    /// Already observed by the engine.
    Observed,
    /// Found by point lookup in the named store.
    FoundInStore(String),
    /// Never seen, or the lookup failed.
    Unresolved,
}

impl OriginStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, OriginStatus::Unresolved)
    }
}

/// Resolve the original purchase of `record`.
///
/// Checks the purchases the engine has observed first, then looks the id up
/// in each store with a short budget and no retry. Lookup failures degrade to
/// [`OriginStatus::Unresolved`]. A purchase found by lookup is remembered.
pub async fn resolve_origin<S: TransactionStore>(
    correlation: &CorrelationStore,
    stores: &[Arc<S>],
    record: &TransactionRecord,
    budget: Duration,
) -> OriginStatus {
    let Some(original_id) = record.original_transaction_id() else {
        return OriginStatus::Unresolved;
    };
    if correlation.knows_purchase(original_id) {
        return OriginStatus::Observed;
    }

    for store in stores {
        match timeout(budget, store.get_record(original_id)).await {
            Ok(Ok(Some(found))) if found.is_purchase() => {
                correlation.observe_purchase(&found);
                metrics::record_origin_lookup("found");
                return OriginStatus::FoundInStore(store.store_id().to_string());
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!(store_id = %store.store_id(), original = %original_id, error = %e, "Origin lookup failed");
                metrics::record_origin_lookup("error");
            }
            Err(_) => {
                debug!(store_id = %store.store_id(), original = %original_id, "Origin lookup timed out");
                metrics::record_origin_lookup("timeout");
            }
        }
    }

    metrics::record_origin_lookup("unresolved");
    OriginStatus::Unresolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorrelationConfig;
    use crate::store::MemoryStore;

    fn setup() -> (CorrelationStore, Vec<Arc<MemoryStore>>) {
        (
            CorrelationStore::new(CorrelationConfig::default()),
            vec![
                Arc::new(MemoryStore::new("STORE_A")),
                Arc::new(MemoryStore::new("STORE_B")),
            ],
        )
    }

    fn refund(original: Option<&str>) -> TransactionRecord {
        TransactionRecord::refund("R1", "STORE_B", "C1", original.map(str::to_string), 10.0, true, 100)
    }

    #[tokio::test]
    async fn test_observed_purchase_resolves_without_lookup() {
        let (cs, stores) = setup();
        cs.observe_purchase(&TransactionRecord::purchase("T1", "STORE_A", "C1", 10.0, 50));
        stores[0].set_offline(true);
        stores[1].set_offline(true);

        let status = resolve_origin(&cs, &stores, &refund(Some("T1")), Duration::from_millis(50)).await;
        assert_eq!(status, OriginStatus::Observed);
    }

    #[tokio::test]
    async fn test_lookup_in_other_store() {
        let (cs, stores) = setup();
        stores[0].pos_append(&TransactionRecord::purchase("T1", "STORE_A", "C1", 10.0, 50));

        let status = resolve_origin(&cs, &stores, &refund(Some("T1")), Duration::from_millis(50)).await;
        assert_eq!(status, OriginStatus::FoundInStore("STORE_A".into()));
        assert!(cs.knows_purchase("T1"));
    }

    #[tokio::test]
    async fn test_return_is_not_a_valid_origin() {
        let (cs, stores) = setup();
        stores[0].pos_append(&TransactionRecord::refund("T1", "STORE_A", "C1", None, 1.0, true, 1));

        let status = resolve_origin(&cs, &stores, &refund(Some("T1")), Duration::from_millis(50)).await;
        assert_eq!(status, OriginStatus::Unresolved);
    }

    #[tokio::test]
    async fn test_missing_original_and_failures_are_unresolved() {
        let (cs, stores) = setup();
        assert_eq!(
            resolve_origin(&cs, &stores, &refund(None), Duration::from_millis(50)).await,
            OriginStatus::Unresolved
        );

        stores[0].set_offline(true);
        stores[1].set_offline(true);
        assert_eq!(
            resolve_origin(&cs, &stores, &refund(Some("T1")), Duration::from_millis(50)).await,
            OriginStatus::Unresolved
        );
    }
}
