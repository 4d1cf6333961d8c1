// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-store return correlation.
//!
//! Every RETURN is scored against recent returns on the same original
//! transaction that were made at a *different* store. Both replication
//! directions feed one shared [`CorrelationStore`].
//!
//! # Concurrency
//!
//! Windows live in a [`DashMap`] keyed by original transaction id, so an
//! update holds only that key's shard lock. Two returns against the same
//! original serialize; returns against different originals run in parallel.
//! No lock is held across an await point.
//!
//! # Flow for one RETURN
//!
//! ```text
//! resolve origin ──► lock window[original] ──► score vs other-store entries
//!                                            ──► insert (dedupe by record id)
//!                                            ──► evict TTL / matched entries
//!                    unlock ◄────────────────────┘
//! ```

mod origin;
mod policy;
mod window;

pub use origin::{resolve_origin, OriginStatus};
pub use policy::{Decision, Indicator, PairScore, RiskLevel, ScoringPolicy};
pub use window::{CorrelationWindow, WindowEntry};

use crate::config::CorrelationConfig;
use crate::record::TransactionRecord;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// A purchase remembered for origin resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRef {
    pub store_id: String,
    pub customer_id: String,
    pub timestamp: i64,
}

/// One conflicting return from another store.
///
/// A pair is always scored from the point of view of its later return
/// (by timestamp, then record id), whichever of the two was ingested first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairMatch {
    /// The other return, already held in the window.
    pub counterpart: WindowEntry,
    /// The return being ingested is the later one and carries the blame.
    pub subject_flagged: bool,
    pub score: u8,
    pub risk_level: RiskLevel,
    pub indicators: Vec<Indicator>,
    pub time_diff_secs: i64,
}

impl PairMatch {
    /// The pair as `[earlier, later]` given the ingested return.
    pub fn ordered(&self, subject: &WindowEntry) -> [WindowEntry; 2] {
        if self.subject_flagged {
            [self.counterpart.clone(), subject.clone()]
        } else {
            [subject.clone(), self.counterpart.clone()]
        }
    }

    /// Record id of the return this pair flags.
    pub fn flagged_id<'a>(&'a self, subject: &'a WindowEntry) -> &'a str {
        if self.subject_flagged {
            &subject.record_id
        } else {
            &self.counterpart.record_id
        }
    }
}

/// Order of two returns against the same original: timestamp, then record id.
fn is_later(a: &WindowEntry, b: &WindowEntry) -> bool {
    (a.timestamp, &a.record_id) > (b.timestamp, &b.record_id)
}

/// Result of correlating one RETURN (or one malformed entry).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlation {
    /// The return being scored.
    pub subject: WindowEntry,
    pub original_transaction_id: Option<String>,
    pub origin_resolved: bool,
    pub malformed: bool,
    /// Conflicting returns, highest score first.
    pub matches: Vec<PairMatch>,
    /// Decision score: the highest of all findings the subject takes part in.
    pub score: u8,
    pub risk_level: RiskLevel,
    pub decision: Decision,
    pub indicators: Vec<Indicator>,
    /// The record was already ingested before (at-least-once redelivery).
    pub replayed: bool,
}

impl Correlation {
    /// Any indicator fired.
    pub fn is_suspicious(&self) -> bool {
        !self.indicators.is_empty()
    }

    /// The return the decision blames: the later return of the top pair,
    /// or the subject itself.
    pub fn flagged(&self) -> &WindowEntry {
        match self.matches.first() {
            Some(m) if !m.subject_flagged => &m.counterpart,
            _ => &self.subject,
        }
    }
}

/// Shared correlation state for both directions.
pub struct CorrelationStore {
    config: CorrelationConfig,
    windows: DashMap<String, CorrelationWindow>,
    purchases: DashMap<String, PurchaseRef>,
    /// Returns with no window key (no original id, malformed) by record id,
    /// remembered for replay detection.
    unlinked: DashMap<String, i64>,
}

impl CorrelationStore {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            purchases: DashMap::new(),
            unlinked: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.config.policy
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Remember a PURCHASE so later returns against it resolve.
    pub fn observe_purchase(&self, record: &TransactionRecord) {
        if !record.is_purchase() {
            return;
        }
        self.purchases.insert(
            record.id.clone(),
            PurchaseRef {
                store_id: record.store_id.clone(),
                customer_id: record.customer_id.clone(),
                timestamp: record.timestamp,
            },
        );
    }

    pub fn knows_purchase(&self, transaction_id: &str) -> bool {
        self.purchases.contains_key(transaction_id)
    }

    pub fn purchase(&self, transaction_id: &str) -> Option<PurchaseRef> {
        self.purchases.get(transaction_id).map(|p| p.clone())
    }

    /// Feed one record. PURCHASEs are observed and yield `None`; every
    /// RETURN yields a [`Correlation`], even when its score is 0.
    pub fn ingest(&self, record: &TransactionRecord, origin: &OriginStatus) -> Option<Correlation> {
        if record.is_purchase() {
            self.observe_purchase(record);
            return None;
        }

        let policy = &self.config.policy;
        let subject = WindowEntry::from(record);
        let original = record.original_transaction_id().map(str::to_string);
        let origin_resolved = original.is_some() && origin.is_resolved();

        let (matches, replayed) = match &original {
            Some(original_id) => self.correlate_in_window(original_id, &subject),
            None => (Vec::new(), self.mark_unlinked(&subject)),
        };

        let mut score = matches.first().map(|m| m.score).unwrap_or(0);
        let mut indicators: BTreeSet<Indicator> = matches
            .iter()
            .flat_map(|m| m.indicators.iter().copied())
            .collect();
        if !origin_resolved {
            score = score.max(policy.unresolvable_score);
            indicators.insert(Indicator::UnresolvableOrigin);
        }

        let risk_level = policy.classify(score);
        trace!(
            record_id = %subject.record_id,
            original = ?original,
            score,
            risk = %risk_level,
            matches = matches.len(),
            replayed,
            "Return correlated"
        );

        Some(Correlation {
            subject,
            original_transaction_id: original,
            origin_resolved,
            malformed: false,
            matches,
            score,
            risk_level,
            decision: risk_level.into(),
            indicators: indicators.into_iter().collect(),
            replayed,
        })
    }

    /// Score a log entry that could not be parsed.
    ///
    /// `record_id` is whatever id could be salvaged; without one the entry is
    /// identified by its log position.
    pub fn ingest_malformed(&self, store_id: &str, record_id: Option<&str>, position: &str) -> Correlation {
        let policy = &self.config.policy;
        let subject = WindowEntry {
            record_id: record_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}@{}", store_id, position)),
            store_id: store_id.to_string(),
            customer_id: String::new(),
            timestamp: chrono::Utc::now().timestamp(),
            has_photo: false,
            amount: 0.0,
        };
        let replayed = self.mark_unlinked(&subject);
        let score = policy.malformed_score;
        let risk_level = policy.classify(score);

        Correlation {
            subject,
            original_transaction_id: None,
            origin_resolved: false,
            malformed: true,
            matches: Vec::new(),
            score,
            risk_level,
            decision: risk_level.into(),
            indicators: vec![Indicator::MalformedRecord],
            replayed,
        }
    }

    fn correlate_in_window(&self, original_id: &str, subject: &WindowEntry) -> (Vec<PairMatch>, bool) {
        let policy = &self.config.policy;
        let ttl = self.config.window_ttl_secs;

        let (outcome, now_empty) = {
            let mut window = self.windows.entry(original_id.to_string()).or_default();
            let replayed = window.contains(&subject.record_id);

            let mut matches: Vec<PairMatch> = window
                .iter()
                .filter(|e| e.record_id != subject.record_id)
                .filter(|e| e.store_id != subject.store_id)
                .filter(|e| (subject.timestamp - e.timestamp).abs() <= ttl)
                .map(|other| {
                    let subject_flagged = is_later(subject, other);
                    let pair = if subject_flagged {
                        policy.score_pair(other, subject)
                    } else {
                        policy.score_pair(subject, other)
                    };
                    PairMatch {
                        counterpart: other.clone(),
                        subject_flagged,
                        score: pair.score,
                        risk_level: policy.classify(pair.score),
                        indicators: pair.indicators,
                        time_diff_secs: pair.time_diff_secs,
                    }
                })
                .collect();
            matches.sort_by(|a, b| {
                b.score
                    .cmp(&a.score)
                    .then_with(|| a.counterpart.record_id.cmp(&b.counterpart.record_id))
            });

            window.push(subject.clone(), self.config.max_entries_per_window);
            let expired = window.evict_older_than(subject.timestamp - ttl);
            if expired > 0 {
                debug!(original = %original_id, expired, "Evicted expired returns from window");
            }
            if self.config.evict_on_match {
                // The earlier return of a blocking pair leaves; the flagged one stays
                for m in matches.iter().filter(|m| m.risk_level.is_blocking()) {
                    let earlier = if m.subject_flagged {
                        &m.counterpart.record_id
                    } else {
                        &subject.record_id
                    };
                    window.remove(earlier);
                }
            }
            ((matches, replayed), window.is_empty())
        };

        if now_empty {
            self.windows.remove_if(original_id, |_, w| w.is_empty());
        }
        outcome
    }

    fn mark_unlinked(&self, subject: &WindowEntry) -> bool {
        self.unlinked
            .insert(subject.record_id.clone(), subject.timestamp)
            .is_some()
    }

    /// Wall-clock sweep: drop window entries older than the TTL, empty
    /// windows, and purchases past retention. Returns evicted window entries.
    pub fn evict_expired(&self, now: i64) -> usize {
        let cutoff = now - self.config.window_ttl_secs;
        let mut evicted = 0usize;
        self.windows.retain(|_, window| {
            evicted += window.evict_older_than(cutoff);
            !window.is_empty()
        });
        self.unlinked.retain(|_, ts| *ts >= cutoff);

        let purchase_cutoff = now - self.config.purchase_retention_secs();
        self.purchases.retain(|_, p| p.timestamp >= purchase_cutoff);

        evicted
    }

    /// Entries currently held for `original_transaction_id`.
    pub fn window_len(&self, original_transaction_id: &str) -> usize {
        self.windows
            .get(original_transaction_id)
            .map(|w| w.len())
            .unwrap_or(0)
    }

    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn tracked_purchases(&self) -> usize {
        self.purchases.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CorrelationStore {
        CorrelationStore::new(CorrelationConfig::default())
    }

    fn refund(id: &str, store_id: &str, customer: &str, ts: i64, has_photo: bool) -> TransactionRecord {
        TransactionRecord::refund(id, store_id, customer, Some("T1".into()), 100.0, has_photo, ts)
    }

    #[test]
    fn test_purchase_is_observed() {
        let cs = store();
        let p = TransactionRecord::purchase("T1", "STORE_A", "C1", 100.0, 900);
        assert!(cs.ingest(&p, &OriginStatus::Unresolved).is_none());
        assert!(cs.knows_purchase("T1"));
        assert_eq!(cs.purchase("T1").unwrap().store_id, "STORE_A");
        assert_eq!(cs.tracked_purchases(), 1);
    }

    #[test]
    fn test_cross_store_fraud_is_critical() {
        let cs = store();
        let r1 = refund("R1", "STORE_A", "CUST_001", 1000, true);
        let r2 = refund("R2", "STORE_B", "FRAUDSTER", 1030, false);

        let first = cs.ingest(&r1, &OriginStatus::Observed).unwrap();
        assert_eq!(first.score, 0);
        assert_eq!(first.risk_level, RiskLevel::Low);
        assert!(!first.is_suspicious());

        let second = cs.ingest(&r2, &OriginStatus::Observed).unwrap();
        assert_eq!(second.score, 100);
        assert_eq!(second.risk_level, RiskLevel::Critical);
        assert_eq!(second.decision, Decision::Blocked);
        assert_eq!(second.matches.len(), 1);
        assert_eq!(second.matches[0].counterpart.record_id, "R1");
        assert!(second.indicators.contains(&Indicator::CustomerMismatch));

        // R1 evicted on match, R2 remains
        assert_eq!(cs.window_len("T1"), 1);
    }

    #[test]
    fn test_reverse_ingest_order_blames_later_return() {
        let cs = store();
        let r1 = refund("R1", "STORE_A", "CUST_001", 1000, true);
        let r2 = refund("R2", "STORE_B", "FRAUDSTER", 1030, false);

        // B→A got there first
        let first = cs.ingest(&r2, &OriginStatus::Observed).unwrap();
        assert_eq!(first.score, 0);

        let second = cs.ingest(&r1, &OriginStatus::Observed).unwrap();
        assert_eq!(second.score, 100);
        assert_eq!(second.risk_level, RiskLevel::Critical);
        assert_eq!(second.matches.len(), 1);
        let pair = &second.matches[0];
        assert!(!pair.subject_flagged);
        assert_eq!(pair.flagged_id(&second.subject), "R2");
        assert_eq!(second.flagged().record_id, "R2");
        assert_eq!(
            pair.ordered(&second.subject).map(|e| e.record_id),
            ["R1".to_string(), "R2".to_string()]
        );
        assert!(second.indicators.contains(&Indicator::NoPhotoVerification));

        // R1 evicted as the earlier return, R2 stays
        assert_eq!(cs.window_len("T1"), 1);
        let third = cs
            .ingest(&refund("R3", "STORE_A", "CUST_001", 1040, true), &OriginStatus::Observed)
            .unwrap();
        assert_eq!(third.matches[0].counterpart.record_id, "R2");
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_record_id() {
        let forward = store();
        forward.ingest(&refund("RA", "STORE_A", "C1", 1000, false), &OriginStatus::Observed);
        let f = forward
            .ingest(&refund("RB", "STORE_B", "C2", 1000, false), &OriginStatus::Observed)
            .unwrap();

        let reverse = store();
        reverse.ingest(&refund("RB", "STORE_B", "C2", 1000, false), &OriginStatus::Observed);
        let r = reverse
            .ingest(&refund("RA", "STORE_A", "C1", 1000, false), &OriginStatus::Observed)
            .unwrap();

        assert_eq!(f.flagged().record_id, "RB");
        assert_eq!(r.flagged().record_id, "RB");
        assert_eq!(f.score, r.score);
    }

    #[test]
    fn test_same_store_returns_do_not_match() {
        let cs = store();
        cs.ingest(&refund("R1", "STORE_A", "C1", 1000, true), &OriginStatus::Observed);
        let c = cs
            .ingest(&refund("R2", "STORE_A", "C2", 1010, false), &OriginStatus::Observed)
            .unwrap();
        assert!(c.matches.is_empty());
        assert_eq!(c.score, 0);
    }

    #[test]
    fn test_ttl_excludes_old_return() {
        let cs = store();
        cs.ingest(&refund("R1", "STORE_A", "C1", 1000, true), &OriginStatus::Observed);
        let c = cs
            .ingest(&refund("R2", "STORE_B", "C2", 1400, false), &OriginStatus::Observed)
            .unwrap();
        assert!(c.matches.is_empty());
        assert_eq!(c.risk_level, RiskLevel::Low);
        // R1 evicted by TTL relative to R2
        assert_eq!(cs.window_len("T1"), 1);
    }

    #[test]
    fn test_unresolvable_origin_scores_max() {
        let cs = store();
        let r = refund("R1", "STORE_B", "C1", 1000, true);
        let c = cs.ingest(&r, &OriginStatus::Unresolved).unwrap();
        assert_eq!(c.score, 100);
        assert!(!c.origin_resolved);
        assert_eq!(c.indicators, vec![Indicator::UnresolvableOrigin]);
        assert!(c.risk_level.is_blocking());
    }

    #[test]
    fn test_missing_original_id_is_unresolvable() {
        let cs = store();
        let r = TransactionRecord::refund("R1", "STORE_B", "C1", None, 10.0, true, 1000);
        let c = cs.ingest(&r, &OriginStatus::Observed).unwrap();
        assert_eq!(c.score, 100);
        assert!(c.original_transaction_id.is_none());
        assert_eq!(cs.open_windows(), 0);

        let again = cs.ingest(&r, &OriginStatus::Observed).unwrap();
        assert!(again.replayed);
    }

    #[test]
    fn test_replay_is_flagged_and_not_reinserted() {
        let cs = store();
        let r1 = refund("R1", "STORE_A", "C1", 1000, true);
        assert!(!cs.ingest(&r1, &OriginStatus::Observed).unwrap().replayed);
        assert!(cs.ingest(&r1, &OriginStatus::Observed).unwrap().replayed);
        assert_eq!(cs.window_len("T1"), 1);
    }

    #[test]
    fn test_highest_pair_wins() {
        let cs = store();
        cs.ingest(&refund("R1", "STORE_A", "C1", 1000, true), &OriginStatus::Observed);
        cs.ingest(&refund("R2", "STORE_A", "C9", 1100, true), &OriginStatus::Observed);
        // vs R1: cross(30) + timing? |1150-1000|=150 no. same customer → 30
        // vs R2: cross(30) + mismatch(25) + timing(|50|<60, 20) → 75
        let c = cs
            .ingest(&refund("R3", "STORE_B", "C1", 1150, true), &OriginStatus::Observed)
            .unwrap();
        assert_eq!(c.matches.len(), 2);
        assert_eq!(c.matches[0].counterpart.record_id, "R2");
        assert_eq!(c.score, 75);
        assert_eq!(c.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_malformed_entry() {
        let cs = store();
        let c = cs.ingest_malformed("STORE_A", None, "1700000000000-0");
        assert!(c.malformed);
        assert_eq!(c.score, 100);
        assert_eq!(c.indicators, vec![Indicator::MalformedRecord]);
        assert_eq!(c.subject.record_id, "STORE_A@1700000000000-0");
        assert!(cs.ingest_malformed("STORE_A", None, "1700000000000-0").replayed);
    }

    #[test]
    fn test_evict_expired_sweeps_windows_and_purchases() {
        let cs = store();
        cs.observe_purchase(&TransactionRecord::purchase("T1", "STORE_A", "C1", 10.0, 0));
        cs.ingest(&refund("R1", "STORE_A", "C1", 1000, true), &OriginStatus::Observed);
        assert_eq!(cs.open_windows(), 1);

        assert_eq!(cs.evict_expired(1200), 0);
        assert_eq!(cs.open_windows(), 1);

        assert_eq!(cs.evict_expired(1400), 1);
        assert_eq!(cs.open_windows(), 0);

        cs.evict_expired(8 * 24 * 3600);
        assert_eq!(cs.tracked_purchases(), 0);
    }

    #[test]
    fn test_evict_on_match_disabled_keeps_prior() {
        let cs = CorrelationStore::new(CorrelationConfig {
            evict_on_match: false,
            ..Default::default()
        });
        cs.ingest(&refund("R1", "STORE_A", "C1", 1000, true), &OriginStatus::Observed);
        cs.ingest(&refund("R2", "STORE_B", "C2", 1010, false), &OriginStatus::Observed);
        assert_eq!(cs.window_len("T1"), 2);
    }
}
