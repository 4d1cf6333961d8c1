// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fraud alerts.
//!
//! An alert is built from one finding of the correlation engine and appended
//! to the alert log of each configured store. Alerts are never updated.
//!
//! # Identity
//!
//! `alert_id` is derived from the fraudulent return's id and its counterpart
//! (the prior return it conflicts with, or the indicator for single-record
//! findings). A replayed record therefore rebuilds the same id, and the
//! store-side id set turns the second append into a duplicate.

use crate::config::AlertConfig;
use crate::correlation::{Correlation, Indicator, RiskLevel, ScoringPolicy, WindowEntry};
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::resilience::{retry_with_backoff, RetryConfig};
use crate::store::{TransactionStore, WriteOutcome};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The only fraud type this engine raises.
pub const UNAUTHORIZED_RETURN: &str = "UNAUTHORIZED_RETURN";

/// One fraud alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAlert {
    pub alert_id: String,
    pub fraud_transaction_id: String,
    pub original_transaction_id: Option<String>,
    /// Store where the fraudulent return happened.
    pub store_id: String,
    pub fraud_type: String,
    pub risk_level: RiskLevel,
    pub score: u8,
    pub indicators: Vec<Indicator>,
    /// RFC 3339.
    pub created_at: String,
    /// Contributing returns, prior first, fraudulent return last.
    pub returns: Vec<WindowEntry>,
    pub time_diff_secs: Option<i64>,
    pub amount: f64,
}

#[derive(Serialize)]
struct Evidence<'a> {
    returns: &'a [WindowEntry],
    time_diff_secs: Option<i64>,
    amount: f64,
}

impl FraudAlert {
    /// Deterministic alert id.
    pub fn make_id(fraud_transaction_id: &str, counterpart: &str) -> String {
        let digest = Sha256::digest(format!("{}|{}", fraud_transaction_id, counterpart).as_bytes());
        format!("ALERT_{}", &hex::encode(digest)[..24])
    }

    /// Encode as alert stream fields.
    pub fn to_stream_fields(&self) -> Result<Vec<(&'static str, String)>> {
        let evidence = Evidence {
            returns: &self.returns,
            time_diff_secs: self.time_diff_secs,
            amount: self.amount,
        };
        Ok(vec![
            ("alert_id", self.alert_id.clone()),
            ("fraud_transaction_id", self.fraud_transaction_id.clone()),
            (
                "original_transaction_id",
                self.original_transaction_id.clone().unwrap_or_default(),
            ),
            ("store_id", self.store_id.clone()),
            ("fraud_type", self.fraud_type.clone()),
            ("risk_level", self.risk_level.as_str().to_string()),
            ("score", self.score.to_string()),
            ("indicators", serde_json::to_string(&self.indicators)?),
            ("created_at", self.created_at.clone()),
            ("evidence", serde_json::to_string(&evidence)?),
        ])
    }

    pub fn stream_payload_size(&self) -> usize {
        self.to_stream_fields()
            .map(|fields| fields.iter().map(|(k, v)| k.len() + v.len()).sum())
            .unwrap_or(0)
    }
}

/// Builds alerts and appends them to the stores' alert logs.
pub struct AlertEmitter<S: TransactionStore> {
    sinks: Vec<Arc<S>>,
    config: AlertConfig,
    policy: ScoringPolicy,
    retry: RetryConfig,
    tx: broadcast::Sender<FraudAlert>,
}

impl<S: TransactionStore> AlertEmitter<S> {
    pub fn new(sinks: Vec<Arc<S>>, config: AlertConfig, policy: ScoringPolicy, retry: RetryConfig) -> Self {
        let (tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sinks,
            config,
            policy,
            retry,
            tx,
        }
    }

    pub fn threshold(&self) -> u8 {
        self.config.alert_threshold
    }

    /// Receive every newly published alert.
    pub fn subscribe(&self) -> broadcast::Receiver<FraudAlert> {
        self.tx.subscribe()
    }

    /// Build an alert for the last entry of `returns` and publish it.
    ///
    /// `returns` holds the conflicting prior return (if any) followed by the
    /// fraudulent return.
    pub async fn emit(
        &self,
        original: Option<&str>,
        returns: Vec<WindowEntry>,
        score: u8,
        indicators: Vec<Indicator>,
    ) -> Result<FraudAlert> {
        let alert = self.build(original, returns, score, indicators)?;
        self.publish(&alert).await?;
        Ok(alert)
    }

    /// One alert per conflicting pair at or above the threshold, plus one for
    /// an unresolvable origin or malformed entry. Returns the alerts that were
    /// newly published.
    pub async fn emit_correlation(&self, correlation: &Correlation) -> Vec<FraudAlert> {
        let threshold = self.config.alert_threshold;
        let subject = &correlation.subject;
        let original = correlation.original_transaction_id.as_deref();
        let mut candidates = Vec::new();

        for m in correlation.matches.iter().filter(|m| m.score >= threshold) {
            candidates.push((
                m.ordered(subject).to_vec(),
                m.score,
                m.indicators.clone(),
            ));
        }
        if correlation.malformed {
            if self.policy.malformed_score >= threshold {
                candidates.push((
                    vec![subject.clone()],
                    self.policy.malformed_score,
                    vec![Indicator::MalformedRecord],
                ));
            }
        } else if !correlation.origin_resolved && self.policy.unresolvable_score >= threshold {
            candidates.push((
                vec![subject.clone()],
                self.policy.unresolvable_score,
                vec![Indicator::UnresolvableOrigin],
            ));
        }

        let mut published = Vec::new();
        for (returns, score, indicators) in candidates {
            let alert = match self.build(original, returns, score, indicators) {
                Ok(alert) => alert,
                Err(e) => {
                    error!(record_id = %subject.record_id, error = %e, "Failed to build alert");
                    continue;
                }
            };
            match self.publish(&alert).await {
                Ok(true) => published.push(alert),
                Ok(false) => {}
                Err(e) => {
                    error!(alert_id = %alert.alert_id, error = %e, "Failed to publish alert");
                }
            }
        }
        published
    }

    fn build(
        &self,
        original: Option<&str>,
        returns: Vec<WindowEntry>,
        score: u8,
        indicators: Vec<Indicator>,
    ) -> Result<FraudAlert> {
        let fraud = returns
            .last()
            .cloned()
            .ok_or_else(|| ReplicationError::Internal("alert without a return".into()))?;
        let prior = (returns.len() > 1).then(|| &returns[0]);
        let counterpart = match prior {
            Some(p) => p.record_id.clone(),
            None => indicators
                .first()
                .map(|i| i.as_str().to_string())
                .unwrap_or_default(),
        };
        let time_diff_secs = prior.map(|p| (fraud.timestamp - p.timestamp).abs());
        let score = score.min(100);

        Ok(FraudAlert {
            alert_id: FraudAlert::make_id(&fraud.record_id, &counterpart),
            fraud_transaction_id: fraud.record_id,
            original_transaction_id: original.map(str::to_string),
            store_id: fraud.store_id,
            fraud_type: UNAUTHORIZED_RETURN.to_string(),
            risk_level: self.policy.classify(score),
            score,
            indicators,
            created_at: chrono::Utc::now().to_rfc3339(),
            amount: fraud.amount,
            time_diff_secs,
            returns,
        })
    }

    /// Append to every target alert log. Returns true if at least one store
    /// had not seen the alert before. Fails only if no store accepted it.
    async fn publish(&self, alert: &FraudAlert) -> Result<bool> {
        let mut newly_appended = false;
        let mut accepted = 0usize;
        let mut last_error = None;

        let targets = self
            .sinks
            .iter()
            .filter(|s| self.config.publish_to_both_stores || s.store_id() == alert.store_id);

        for sink in targets {
            match retry_with_backoff(&self.retry, "append_alert", || sink.append_alert(alert)).await {
                Ok(WriteOutcome::Applied { .. }) => {
                    newly_appended = true;
                    accepted += 1;
                }
                Ok(WriteOutcome::Duplicate) => accepted += 1,
                Err(e) => {
                    warn!(store_id = %sink.store_id(), alert_id = %alert.alert_id, error = %e, "Alert append failed");
                    metrics::record_alert_failure(sink.store_id());
                    last_error = Some(e);
                }
            }
        }

        if accepted == 0 {
            return Err(last_error.unwrap_or_else(|| {
                ReplicationError::Internal(format!("no alert log for store {}", alert.store_id))
            }));
        }

        if newly_appended {
            info!(
                alert_id = %alert.alert_id,
                fraud_transaction_id = %alert.fraud_transaction_id,
                original = ?alert.original_transaction_id,
                store_id = %alert.store_id,
                risk = %alert.risk_level,
                score = alert.score,
                "Fraud alert raised"
            );
            metrics::record_alert(alert.risk_level.as_str());
            // No subscribers is fine
            let _ = self.tx.send(alert.clone());
        }
        Ok(newly_appended)
    }
}
