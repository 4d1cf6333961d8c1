// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Scoring policy: indicator weights and risk thresholds.
//!
//! # Scoring
//!
//! ```text
//! Indicator                    Default weight
//! ---------                    --------------
//! same_original_cross_store    30
//! no_photo_verification        40
//! customer_mismatch            25
//! suspicious_timing (< 60s)    20
//!
//! score = min(100, sum)
//!
//! ≥ 90  CRITICAL  blocked
//! ≥ 70  HIGH      blocked
//! ≥ 40  MEDIUM    manual review
//! else  LOW       approved
//! ```

use super::window::WindowEntry;
use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reason a RETURN was scored as suspicious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    /// Another store already saw a return against the same original.
    SameOriginalCrossStore,
    /// The later return had no photo verification.
    NoPhotoVerification,
    /// The two returns were made by different customers.
    CustomerMismatch,
    /// The two returns happened close together.
    SuspiciousTiming,
    /// The original purchase was never seen in any store.
    UnresolvableOrigin,
    /// The log entry could not be parsed.
    MalformedRecord,
}

impl Indicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Indicator::SameOriginalCrossStore => "same_original_cross_store",
            Indicator::NoPhotoVerification => "no_photo_verification",
            Indicator::CustomerMismatch => "customer_mismatch",
            Indicator::SuspiciousTiming => "suspicious_timing",
            Indicator::UnresolvableOrigin => "unresolvable_origin",
            Indicator::MalformedRecord => "malformed_record",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// HIGH and CRITICAL returns are blocked.
    pub fn is_blocking(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What should happen to the return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    ManualReview,
    Blocked,
}

impl From<RiskLevel> for Decision {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => Decision::Approved,
            RiskLevel::Medium => Decision::ManualReview,
            RiskLevel::High | RiskLevel::Critical => Decision::Blocked,
        }
    }
}

/// Score of one incoming return against one prior return.
#[derive(Debug, Clone, PartialEq)]
pub struct PairScore {
    pub score: u8,
    pub indicators: Vec<Indicator>,
    /// Absolute distance between the two returns, in seconds.
    pub time_diff_secs: i64,
}

/// Indicator weights and classification thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    #[serde(default = "default_cross_store_weight")]
    pub cross_store_weight: u32,

    #[serde(default = "default_no_photo_weight")]
    pub no_photo_weight: u32,

    #[serde(default = "default_customer_mismatch_weight")]
    pub customer_mismatch_weight: u32,

    #[serde(default = "default_suspicious_timing_weight")]
    pub suspicious_timing_weight: u32,

    /// Returns strictly closer than this many seconds are "suspicious timing".
    #[serde(default = "default_suspicious_timing_secs")]
    pub suspicious_timing_secs: i64,

    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: u8,

    #[serde(default = "default_high_threshold")]
    pub high_threshold: u8,

    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: u8,

    /// Score given to a return whose original purchase cannot be found.
    #[serde(default = "default_max_score")]
    pub unresolvable_score: u8,

    /// Score given to a log entry that cannot be parsed.
    #[serde(default = "default_max_score")]
    pub malformed_score: u8,
}

fn default_cross_store_weight() -> u32 {
    30
}

fn default_no_photo_weight() -> u32 {
    40
}

fn default_customer_mismatch_weight() -> u32 {
    25
}

fn default_suspicious_timing_weight() -> u32 {
    20
}

fn default_suspicious_timing_secs() -> i64 {
    60
}

fn default_medium_threshold() -> u8 {
    40
}

fn default_high_threshold() -> u8 {
    70
}

fn default_critical_threshold() -> u8 {
    90
}

fn default_max_score() -> u8 {
    100
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            cross_store_weight: default_cross_store_weight(),
            no_photo_weight: default_no_photo_weight(),
            customer_mismatch_weight: default_customer_mismatch_weight(),
            suspicious_timing_weight: default_suspicious_timing_weight(),
            suspicious_timing_secs: default_suspicious_timing_secs(),
            medium_threshold: default_medium_threshold(),
            high_threshold: default_high_threshold(),
            critical_threshold: default_critical_threshold(),
            unresolvable_score: default_max_score(),
            malformed_score: default_max_score(),
        }
    }
}

impl ScoringPolicy {
    /// Thresholds must be ordered and within [0, 100].
    pub fn validate(&self) -> Result<()> {
        if self.medium_threshold > self.high_threshold
            || self.high_threshold > self.critical_threshold
            || self.critical_threshold > 100
        {
            return Err(ReplicationError::Config(format!(
                "risk thresholds must satisfy medium <= high <= critical <= 100 (got {}/{}/{})",
                self.medium_threshold, self.high_threshold, self.critical_threshold
            )));
        }
        if self.unresolvable_score > 100 || self.malformed_score > 100 {
            return Err(ReplicationError::Config(
                "unresolvable_score and malformed_score must be <= 100".into(),
            ));
        }
        Ok(())
    }

    /// Score `incoming` against a prior return from a different store.
    ///
    /// The caller checks the store and TTL preconditions.
    pub fn score_pair(&self, prior: &WindowEntry, incoming: &WindowEntry) -> PairScore {
        let time_diff_secs = (incoming.timestamp - prior.timestamp).abs();
        let mut total: u32 = self.cross_store_weight;
        let mut indicators = vec![Indicator::SameOriginalCrossStore];

        if !incoming.has_photo {
            total = total.saturating_add(self.no_photo_weight);
            indicators.push(Indicator::NoPhotoVerification);
        }
        if incoming.customer_id != prior.customer_id {
            total = total.saturating_add(self.customer_mismatch_weight);
            indicators.push(Indicator::CustomerMismatch);
        }
        if time_diff_secs < self.suspicious_timing_secs {
            total = total.saturating_add(self.suspicious_timing_weight);
            indicators.push(Indicator::SuspiciousTiming);
        }

        PairScore {
            score: total.min(100) as u8,
            indicators,
            time_diff_secs,
        }
    }

    pub fn classify(&self, score: u8) -> RiskLevel {
        if score >= self.critical_threshold {
            RiskLevel::Critical
        } else if score >= self.high_threshold {
            RiskLevel::High
        } else if score >= self.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, store: &str, customer: &str, ts: i64, has_photo: bool) -> WindowEntry {
        WindowEntry {
            record_id: id.to_string(),
            store_id: store.to_string(),
            customer_id: customer.to_string(),
            timestamp: ts,
            has_photo,
            amount: -100.0,
        }
    }

    #[test]
    fn test_all_indicators_clamp_to_100() {
        let policy = ScoringPolicy::default();
        let prior = entry("R1", "STORE_A", "CUST_001", 1000, true);
        let incoming = entry("R2", "STORE_B", "FRAUDSTER", 1030, false);

        let pair = policy.score_pair(&prior, &incoming);
        assert_eq!(pair.score, 100);
        assert_eq!(pair.time_diff_secs, 30);
        assert_eq!(
            pair.indicators,
            vec![
                Indicator::SameOriginalCrossStore,
                Indicator::NoPhotoVerification,
                Indicator::CustomerMismatch,
                Indicator::SuspiciousTiming,
            ]
        );
        assert_eq!(policy.classify(pair.score), RiskLevel::Critical);
    }

    #[test]
    fn test_cross_store_only_is_low() {
        let policy = ScoringPolicy::default();
        let prior = entry("R1", "STORE_A", "C1", 1000, true);
        let incoming = entry("R2", "STORE_B", "C1", 1200, true);

        let pair = policy.score_pair(&prior, &incoming);
        assert_eq!(pair.score, 30);
        assert_eq!(policy.classify(pair.score), RiskLevel::Low);
    }

    #[test]
    fn test_no_photo_cross_store_is_high() {
        let policy = ScoringPolicy::default();
        let prior = entry("R1", "STORE_A", "C1", 1000, true);
        let incoming = entry("R2", "STORE_B", "C1", 1200, false);

        let pair = policy.score_pair(&prior, &incoming);
        assert_eq!(pair.score, 70);
        assert_eq!(policy.classify(pair.score), RiskLevel::High);
    }

    #[test]
    fn test_timing_boundary_is_exclusive() {
        let policy = ScoringPolicy::default();
        let prior = entry("R1", "STORE_A", "C1", 1000, true);
        let incoming = entry("R2", "STORE_B", "C1", 1060, true);
        assert!(!policy
            .score_pair(&prior, &incoming)
            .indicators
            .contains(&Indicator::SuspiciousTiming));
    }

    #[test]
    fn test_classify_boundaries() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.classify(0), RiskLevel::Low);
        assert_eq!(policy.classify(39), RiskLevel::Low);
        assert_eq!(policy.classify(40), RiskLevel::Medium);
        assert_eq!(policy.classify(69), RiskLevel::Medium);
        assert_eq!(policy.classify(70), RiskLevel::High);
        assert_eq!(policy.classify(89), RiskLevel::High);
        assert_eq!(policy.classify(90), RiskLevel::Critical);
        assert_eq!(policy.classify(100), RiskLevel::Critical);
    }

    #[test]
    fn test_decision_from_level() {
        assert_eq!(Decision::from(RiskLevel::Low), Decision::Approved);
        assert_eq!(Decision::from(RiskLevel::Medium), Decision::ManualReview);
        assert_eq!(Decision::from(RiskLevel::High), Decision::Blocked);
        assert_eq!(Decision::from(RiskLevel::Critical), Decision::Blocked);
        assert!(RiskLevel::High.is_blocking());
        assert!(!RiskLevel::Medium.is_blocking());
    }

    #[test]
    fn test_custom_weights() {
        let policy = ScoringPolicy {
            no_photo_weight: 10,
            ..Default::default()
        };
        let prior = entry("R1", "STORE_A", "C1", 1000, true);
        let incoming = entry("R2", "STORE_B", "C1", 1500, false);
        assert_eq!(policy.score_pair(&prior, &incoming).score, 40);
    }

    #[test]
    fn test_validate_rejects_unordered_thresholds() {
        let policy = ScoringPolicy {
            medium_threshold: 80,
            high_threshold: 70,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
        assert!(ScoringPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&Indicator::UnresolvableOrigin).unwrap(),
            "\"unresolvable_origin\""
        );
        assert_eq!(serde_json::to_string(&RiskLevel::Critical).unwrap(), "\"CRITICAL\"");
        assert_eq!(Indicator::NoPhotoVerification.to_string(), "no_photo_verification");
    }

    #[test]
    fn test_policy_json_partial() {
        let policy: ScoringPolicy = serde_json::from_str(r#"{"no_photo_weight": 35}"#).unwrap();
        assert_eq!(policy.no_photo_weight, 35);
        assert_eq!(policy.cross_store_weight, 30);
        assert_eq!(policy.critical_threshold, 90);
    }
}
