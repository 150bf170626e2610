//! Derived progress metrics.
//!
//! Progress records are append-only; every summary a tutor or parent sees is
//! recomputed from them on read.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Minimum number of scored records before a trend is reported.
const TREND_MIN_SCORES: usize = 3;

/// Points the recent average must move before the trend changes.
const TREND_THRESHOLD: f64 = 5.0;

/// Read-only view of a progress record, as needed by [`calculate`].
pub trait ProgressEntry {
    fn kind(&self) -> &str;
    fn status(&self) -> Option<&str>;
    fn score(&self) -> Option<f64>;
    fn created_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMetrics {
    pub total_assignments: usize,
    pub completed_assignments: usize,
    pub average_score: f64,
    pub improvement_trend: Trend,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Compute metrics from records ordered newest first.
pub fn calculate<E: ProgressEntry>(records: &[E]) -> ProgressMetrics {
    let assignments: Vec<&E> = records
        .iter()
        .filter(|r| matches!(r.kind(), "assignment" | "homework"))
        .collect();

    let completed = assignments
        .iter()
        .filter(|a| matches!(a.status(), Some("completed") | Some("submitted")))
        .count();

    let scores: Vec<f64> = assignments.iter().filter_map(|a| a.score()).collect();

    let average = mean(&scores).unwrap_or(0.0);

    let mut trend = Trend::Neutral;
    if scores.len() >= TREND_MIN_SCORES {
        let (recent, older) = scores.split_at(scores.len() / 2);
        if let (Some(recent_avg), Some(older_avg)) = (mean(recent), mean(older)) {
            if recent_avg > older_avg + TREND_THRESHOLD {
                trend = Trend::Improving;
            } else if recent_avg < older_avg - TREND_THRESHOLD {
                trend = Trend::Declining;
            }
        }
    }

    ProgressMetrics {
        total_assignments: assignments.len(),
        completed_assignments: completed,
        average_score: (average * 10.0).round() / 10.0,
        improvement_trend: trend,
        last_activity: records.first().map(|r| r.created_at()),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct Rec {
        kind: &'static str,
        status: Option<&'static str>,
        score: Option<f64>,
        at: DateTime<Utc>,
    }

    impl ProgressEntry for Rec {
        fn kind(&self) -> &str {
            self.kind
        }
        fn status(&self) -> Option<&str> {
            self.status
        }
        fn score(&self) -> Option<f64> {
            self.score
        }
        fn created_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    fn rec(kind: &'static str, status: &'static str, score: Option<f64>, age_days: i64) -> Rec {
        Rec {
            kind,
            status: Some(status),
            score,
            at: Utc::now() - Duration::days(age_days),
        }
    }

    #[test]
    fn empty_records_are_neutral() {
        let m = calculate::<Rec>(&[]);
        assert_eq!(m.total_assignments, 0);
        assert_eq!(m.average_score, 0.0);
        assert_eq!(m.improvement_trend, Trend::Neutral);
        assert!(m.last_activity.is_none());
    }

    #[test]
    fn counts_only_assignments_and_homework() {
        let records = vec![
            rec("homework", "submitted", Some(80.0), 0),
            rec("assignment", "completed", Some(70.0), 1),
            rec("assignment", "assigned", None, 2),
            rec("homework_submission", "submitted", Some(10.0), 3),
        ];
        let m = calculate(&records);
        assert_eq!(m.total_assignments, 3);
        assert_eq!(m.completed_assignments, 2);
        assert_eq!(m.average_score, 75.0);
        assert_eq!(m.last_activity, Some(records[0].at));
    }

    #[test]
    fn improving_trend_when_recent_scores_higher() {
        let records = vec![
            rec("homework", "completed", Some(90.0), 0),
            rec("homework", "completed", Some(60.0), 1),
            rec("homework", "completed", Some(62.0), 2),
            rec("homework", "completed", Some(58.0), 3),
        ];
        assert_eq!(calculate(&records).improvement_trend, Trend::Improving);
    }

    #[test]
    fn declining_trend_and_rounding() {
        let records = vec![
            rec("assignment", "completed", Some(40.0), 0),
            rec("assignment", "completed", Some(70.0), 1),
            rec("assignment", "completed", Some(71.0), 2),
        ];
        let m = calculate(&records);
        assert_eq!(m.improvement_trend, Trend::Declining);
        assert_eq!(m.average_score, 60.3);
    }

    #[test]
    fn small_differences_stay_neutral() {
        let records = vec![
            rec("assignment", "completed", Some(72.0), 0),
            rec("assignment", "completed", Some(70.0), 1),
            rec("assignment", "completed", Some(69.0), 2),
        ];
        assert_eq!(calculate(&records).improvement_trend, Trend::Neutral);
    }
}
