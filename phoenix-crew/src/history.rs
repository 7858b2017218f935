//! In-memory record of completed fixes

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One successful fix
#[derive(Debug, Clone, Serialize)]
pub struct FixRecord {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Local>,
    pub original_code: String,
    pub fixed_code: String,
    #[serde(rename = "execution_time_secs", serialize_with = "serialize_secs")]
    pub execution_time: Duration,
}

impl FixRecord {
    pub fn new(original_code: impl Into<String>, fixed_code: impl Into<String>, execution_time: Duration) -> Self {
        Self {
            timestamp: Local::now(),
            original_code: original_code.into(),
            fixed_code: fixed_code.into(),
            execution_time,
        }
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Local>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Append-only fix history shared across sessions
#[derive(Debug, Clone, Default)]
pub struct FixHistory {
    records: Arc<RwLock<Vec<FixRecord>>>,
}

impl FixHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, record: FixRecord) {
        self.records.write().await.push(record);
    }

    /// The last `n` records, oldest first
    pub async fn recent(&self, n: usize) -> Vec<FixRecord> {
        let records = self.records.read().await;
        let start = records.len().saturating_sub(n);
        records[start..].to_vec()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_keeps_submission_order() {
        let history = FixHistory::new();
        assert!(history.is_empty().await);

        for i in 0..5 {
            history
                .append(FixRecord::new(format!("code {}", i), format!("fixed {}", i), Duration::from_secs(i)))
                .await;
        }

        assert_eq!(history.len().await, 5);
        let recent = history.recent(3).await;
        let fixed: Vec<&str> = recent.iter().map(|r| r.fixed_code.as_str()).collect();
        assert_eq!(fixed, vec!["fixed 2", "fixed 3", "fixed 4"]);
        assert_eq!(history.recent(50).await.len(), 5);
        assert!(history.recent(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let history = FixHistory::new();
        let other = history.clone();
        other.append(FixRecord::new("a", "b", Duration::ZERO)).await;
        assert_eq!(history.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends() {
        let history = FixHistory::new();
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let history = history.clone();
                tokio::spawn(async move {
                    history
                        .append(FixRecord::new(format!("code {}", i), "fixed", Duration::ZERO))
                        .await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(history.len().await, 32);
        let mut seen: Vec<_> = history.recent(32).await.into_iter().map(|r| r.original_code).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 32);
    }

    #[test]
    fn test_record_serialization() {
        let record = FixRecord::new("x = 1", "x = 1\nprint(x)", Duration::from_millis(1500));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["execution_time_secs"], 1.5);
        let ts = json["timestamp"].as_str().unwrap();
        assert_eq!(ts, record.formatted_timestamp());
        assert!(chrono::NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).is_ok());
    }
}
