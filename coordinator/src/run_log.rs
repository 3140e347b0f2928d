use std::{fs, io, path::Path};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{config::Mode, dataset::Label};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Serializes timestamps the way run logs have always been written, `%Y-%m-%d %H:%M:%S` in UTC.
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format(super::TIME_FORMAT))
    }
}

/// The validation loss after one round, never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationLossRecord {
    #[serde(with = "timestamp")]
    pub time: DateTime<Utc>,
    pub loss_val: f32,
}

impl ValidationLossRecord {
    pub fn now(loss_val: f32) -> Self {
        Self {
            time: Utc::now(),
            loss_val,
        }
    }
}

/// Accuracy of the final model, overall and per class.
///
/// A metric is `None` when there are no samples to compute it on.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accuracy {
    pub overall: Option<f64>,
    pub positive: Option<f64>,
    pub negative: Option<f64>,
}

impl Accuracy {
    /// Compares predictions against the true labels.
    ///
    /// # Arguments
    /// * `targets` - The true labels.
    /// * `predictions` - One prediction per target.
    pub fn measure(targets: &[Label], predictions: &[Label]) -> Self {
        let ratio = |class: Option<Label>| {
            let (hits, total) = targets
                .iter()
                .zip(predictions)
                .filter(|(target, _)| class.is_none_or(|c| **target == c))
                .fold((0usize, 0usize), |(hits, total), (t, p)| {
                    (hits + usize::from(t == p), total + 1)
                });

            (total > 0).then(|| hits as f64 / total as f64)
        };

        Self {
            overall: ratio(None),
            positive: ratio(Some(1)),
            negative: ratio(Some(-1)),
        }
    }
}

/// The write-once summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunLog {
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub end_time: DateTime<Utc>,
    /// Elapsed seconds.
    pub running_time: f64,
    pub n_workers: usize,
    pub running_mode: Mode,
    pub accuracy: Option<f64>,
    #[serde(rename = "accuracy_1")]
    pub accuracy_positive: Option<f64>,
    #[serde(rename = "accuracy_-1")]
    pub accuracy_negative: Option<f64>,
    pub losses_val: Vec<ValidationLossRecord>,
    pub tag: String,
}

impl RunLog {
    /// Writes this log as pretty printed JSON.
    ///
    /// # Arguments
    /// * `path` - The destination file, created or truncated.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn accuracy_is_split_by_class() {
        let accuracy = Accuracy::measure(&[1, 1, -1, -1, -1], &[1, -1, -1, -1, 1]);

        assert_eq!(accuracy.overall, Some(0.6));
        assert_eq!(accuracy.positive, Some(0.5));
        assert_eq!(accuracy.negative, Some(2.0 / 3.0));
    }

    #[test]
    fn missing_class_has_no_accuracy() {
        let accuracy = Accuracy::measure(&[1, 1], &[1, 1]);
        assert_eq!(accuracy.negative, None);
        assert_eq!(accuracy.overall, Some(1.0));

        assert_eq!(Accuracy::measure(&[], &[]), Accuracy::default());
    }

    #[test]
    fn log_serializes_with_legacy_field_names() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 30).unwrap();

        let log = RunLog {
            start_time: start,
            end_time: end,
            running_time: 330.0,
            n_workers: 3,
            running_mode: Mode::Asynchronous,
            accuracy: Some(0.75),
            accuracy_positive: Some(1.0),
            accuracy_negative: None,
            losses_val: vec![ValidationLossRecord {
                time: end,
                loss_val: 0.5,
            }],
            tag: "baseline".into(),
        };

        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(
            value,
            json!({
                "start_time": "2024-03-01 12:00:00",
                "end_time": "2024-03-01 12:05:30",
                "running_time": 330.0,
                "n_workers": 3,
                "running_mode": "asynchronous",
                "accuracy": 0.75,
                "accuracy_1": 1.0,
                "accuracy_-1": null,
                "losses_val": [{ "time": "2024-03-01 12:05:30", "loss_val": 0.5 }],
                "tag": "baseline"
            })
        );
    }
}
