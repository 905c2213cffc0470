use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::RunConfig;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingRecord {
    pub run_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub epochs_run: usize,
    pub best_validation_cost: Option<f64>,
    pub config: RunConfig,
}

impl TrainingRecord {
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        epochs_run: usize,
        best_validation_cost: Option<f64>,
        config: &RunConfig,
    ) -> Self {
        let duration_seconds = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
        Self {
            run_id: Uuid::new_v4(),
            start_time,
            end_time,
            duration_seconds,
            epochs_run,
            best_validation_cost,
            config: config.clone(),
        }
    }
}

/// Append-only log of training runs. Owned by whoever drives training and threaded through save/load.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct TrainingHistory {
    records: Vec<TrainingRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: TrainingRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TrainingRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&TrainingRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ConfigMap, ConfigResolver, DEFAULT_HYPERPARAMETERS};
    use chrono::Duration;

    #[test]
    fn records_keep_append_order_and_duration() {
        let config = ConfigResolver::resolve(&DEFAULT_HYPERPARAMETERS, &ConfigMap::new(), &ConfigMap::new()).unwrap();
        let start = Utc::now();
        let mut history = TrainingHistory::new();
        history.append(TrainingRecord::new(start, start + Duration::milliseconds(1500), 3, Some(4.2), &config));
        history.append(TrainingRecord::new(start, start + Duration::seconds(2), 5, None, &config));

        assert_eq!(history.len(), 2);
        assert_eq!(history.records()[0].duration_seconds, 1.5);
        assert_eq!(history.latest().unwrap().epochs_run, 5);
        assert_ne!(history.records()[0].run_id, history.records()[1].run_id);
    }

    #[test]
    fn serializes_as_a_plain_list() {
        let value = serde_json::to_value(TrainingHistory::new()).unwrap();
        assert_eq!(value, serde_json::json!([]));
    }
}
