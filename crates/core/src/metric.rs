use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::limit::LimitConfig;
use crate::types::MetricName;

/// Sentinel for `cleanup_after_seconds` meaning "never reap".
pub const CLEANUP_NEVER: i64 = -1;

/// Cleanup interval applied when a label is not recognized (one day).
pub const DEFAULT_CLEANUP_SECONDS: i64 = 86_400;

/// How recorded values combine with the running value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricOperation {
    /// Add each value.
    #[default]
    #[serde(alias = "SUM")]
    Sum,
    /// Running mean of all values since the last reset.
    #[serde(alias = "AVG")]
    Avg,
    /// Keep the largest value seen.
    #[serde(alias = "MAX")]
    Max,
    /// Keep the smallest value seen.
    #[serde(alias = "MIN")]
    Min,
    /// Count records regardless of their value.
    #[serde(alias = "COUNT")]
    Count,
}

impl MetricOperation {
    /// Combine `value` into `current`.
    ///
    /// `samples` is the number of values already folded into `current` since
    /// the last reset. The first sample replaces `current` for
    /// [`Max`](Self::Max) and [`Min`](Self::Min), so an empty window holding
    /// `0.0` never wins the comparison.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn combine(self, current: f64, samples: u64, value: f64) -> f64 {
        match self {
            Self::Sum => current + value,
            Self::Max | Self::Min if samples == 0 => value,
            Self::Max => current.max(value),
            Self::Min => current.min(value),
            Self::Count => current + 1.0,
            Self::Avg => {
                let n = (samples + 1) as f64;
                current + (value - current) / n
            }
        }
    }

    /// Lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
            Self::Count => "count",
        }
    }
}

impl FromStr for MetricOperation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "count" => Ok(Self::Count),
            _ => Err(CoreError::UnknownOperation(s.to_owned())),
        }
    }
}

impl fmt::Display for MetricOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reset behavior of a metric across ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Zeroed on every matching tick.
    #[default]
    Reset,
    /// Persists across ticks.
    Checkpoint,
    /// Checkpoint metric reported to billing; ticks no faster than hourly.
    StripeBilling,
}

impl MetricType {
    /// Snake-case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Checkpoint => "checkpoint",
            Self::StripeBilling => "stripe_billing",
        }
    }
}

impl FromStr for MetricType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reset" => Ok(Self::Reset),
            "checkpoint" => Ok(Self::Checkpoint),
            "stripe_billing" | "stripebilling" => Ok(Self::StripeBilling),
            _ => Err(CoreError::UnknownMetricType(s.to_owned())),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of tick intervals a metric can be scheduled on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickType {
    #[serde(rename = "1s")]
    OneSecond,
    #[serde(rename = "5s")]
    FiveSeconds,
    #[serde(rename = "15s")]
    FifteenSeconds,
    #[serde(rename = "30s")]
    ThirtySeconds,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[default]
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl TickType {
    /// Every tick type, shortest first.
    pub const ALL: [Self; 10] = [
        Self::OneSecond,
        Self::FiveSeconds,
        Self::FifteenSeconds,
        Self::ThirtySeconds,
        Self::OneMinute,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::SixHours,
        Self::OneDay,
    ];

    /// Interval length in seconds.
    #[must_use]
    pub fn duration_seconds(self) -> u64 {
        match self {
            Self::OneSecond => 1,
            Self::FiveSeconds => 5,
            Self::FifteenSeconds => 15,
            Self::ThirtySeconds => 30,
            Self::OneMinute => 60,
            Self::FifteenMinutes => 900,
            Self::ThirtyMinutes => 1_800,
            Self::OneHour => 3_600,
            Self::SixHours => 21_600,
            Self::OneDay => 86_400,
        }
    }

    /// Interval as a [`std::time::Duration`].
    #[must_use]
    pub fn duration(self) -> std::time::Duration {
        std::time::Duration::from_secs(self.duration_seconds())
    }

    /// Short label (`"1s"` .. `"1d"`).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OneSecond => "1s",
            Self::FiveSeconds => "5s",
            Self::FifteenSeconds => "15s",
            Self::ThirtySeconds => "30s",
            Self::OneMinute => "1m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::SixHours => "6h",
            Self::OneDay => "1d",
        }
    }
}

impl FromStr for TickType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.label() == s)
            .ok_or_else(|| CoreError::UnknownTickType(s.to_owned()))
    }
}

impl fmt::Display for TickType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a cleanup label to seconds of inactivity before a unit is reaped.
///
/// `"never"` maps to [`CLEANUP_NEVER`]; unknown labels fall back to
/// [`DEFAULT_CLEANUP_SECONDS`].
#[must_use]
pub fn cleanup_after_seconds(label: &str) -> i64 {
    match label {
        "5s" => 5,
        "1m" => 60,
        "1h" => 3_600,
        "6h" => 21_600,
        "1d" => 86_400,
        "7d" => 604_800,
        "30d" => 2_592_000,
        "never" => CLEANUP_NEVER,
        _ => DEFAULT_CLEANUP_SECONDS,
    }
}

/// Apply the billing floor: `StripeBilling` metrics tick at most hourly.
///
/// Sub-hour requests for billing metrics become [`TickType::OneHour`]; all
/// other combinations pass through unchanged.
#[must_use]
pub fn coerce_tick_type(metric_type: MetricType, requested: TickType) -> TickType {
    if metric_type == MetricType::StripeBilling
        && requested.duration_seconds() < TickType::OneHour.duration_seconds()
    {
        TickType::OneHour
    } else {
        requested
    }
}

/// A request to create (ensure) a metric tracking unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Metric name, unique within its scope.
    pub metric_name: MetricName,
    /// How recorded values combine.
    #[serde(default)]
    pub operation: MetricOperation,
    /// Tick interval driving reset and flush.
    #[serde(default)]
    pub tick_type: TickType,
    /// Reset behavior across ticks.
    #[serde(default)]
    pub metric_type: MetricType,
    /// Cleanup label (`"5s"`, `"1h"`, `"never"`, ...).
    #[serde(default = "default_cleanup_label")]
    pub cleanup_after: String,
    /// Starting value.
    #[serde(default)]
    pub initial_value: f64,
    /// Limit requested by the caller; a matching plan limit takes precedence.
    #[serde(default)]
    pub limit: Option<LimitConfig>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Optional structured metadata.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

fn default_cleanup_label() -> String {
    "1d".to_owned()
}

impl MetricSpec {
    /// A `SUM`/`Reset` metric with default scheduling and no limit.
    pub fn new(metric_name: impl Into<MetricName>) -> Self {
        Self {
            metric_name: metric_name.into(),
            operation: MetricOperation::default(),
            tick_type: TickType::default(),
            metric_type: MetricType::default(),
            cleanup_after: default_cleanup_label(),
            initial_value: 0.0,
            limit: None,
            tags: HashMap::new(),
            metadata: None,
        }
    }

    /// Apply creation-time normalization (the billing tick floor).
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.tick_type = coerce_tick_type(self.metric_type, self.tick_type);
        self
    }

    /// Cleanup interval in seconds for this spec's label.
    #[must_use]
    pub fn cleanup_after_seconds(&self) -> i64 {
        cleanup_after_seconds(&self.cleanup_after)
    }

    /// Reject names and values that cannot back a tracking unit.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.metric_name.is_blank() {
            return Err(CoreError::InvalidMetricName(
                "metric_name must not be empty".into(),
            ));
        }
        if !self.initial_value.is_finite() {
            return Err(CoreError::InvalidLimit {
                metric: self.metric_name.to_string(),
                reason: "initial_value must be finite".into(),
            });
        }
        if let Some(limit) = &self.limit {
            limit.validate(&self.metric_name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_labels_map_exactly() {
        assert_eq!(cleanup_after_seconds("5s"), 5);
        assert_eq!(cleanup_after_seconds("1m"), 60);
        assert_eq!(cleanup_after_seconds("1h"), 3_600);
        assert_eq!(cleanup_after_seconds("6h"), 21_600);
        assert_eq!(cleanup_after_seconds("1d"), 86_400);
        assert_eq!(cleanup_after_seconds("7d"), 604_800);
        assert_eq!(cleanup_after_seconds("30d"), 2_592_000);
        assert_eq!(cleanup_after_seconds("never"), -1);
    }

    #[test]
    fn unknown_cleanup_label_defaults_to_one_day() {
        assert_eq!(cleanup_after_seconds("2w"), 86_400);
        assert_eq!(cleanup_after_seconds(""), 86_400);
        assert_eq!(cleanup_after_seconds("NEVER"), 86_400);
    }

    #[test]
    fn stripe_billing_sub_hour_ticks_are_raised_to_one_hour() {
        for tick in [
            TickType::OneSecond,
            TickType::FiveSeconds,
            TickType::FifteenSeconds,
            TickType::ThirtySeconds,
            TickType::OneMinute,
            TickType::FifteenMinutes,
            TickType::ThirtyMinutes,
        ] {
            assert_eq!(
                coerce_tick_type(MetricType::StripeBilling, tick),
                TickType::OneHour
            );
        }
    }

    #[test]
    fn stripe_billing_hourly_or_longer_passes_through() {
        for tick in [TickType::OneHour, TickType::SixHours, TickType::OneDay] {
            assert_eq!(coerce_tick_type(MetricType::StripeBilling, tick), tick);
        }
    }

    #[test]
    fn other_metric_types_are_never_coerced() {
        for metric_type in [MetricType::Reset, MetricType::Checkpoint] {
            for tick in TickType::ALL {
                assert_eq!(coerce_tick_type(metric_type, tick), tick);
            }
        }
    }

    #[test]
    fn spec_normalization_applies_floor() {
        let mut spec = MetricSpec::new("invoices");
        spec.metric_type = MetricType::StripeBilling;
        spec.tick_type = TickType::OneSecond;
        assert_eq!(spec.normalized().tick_type, TickType::OneHour);
    }

    #[test]
    fn tick_labels_parse_back() {
        for tick in TickType::ALL {
            assert_eq!(tick.label().parse::<TickType>().unwrap(), tick);
        }
        assert!("2h".parse::<TickType>().is_err());
        assert_eq!(
            serde_json::to_string(&TickType::FifteenMinutes).unwrap(),
            "\"15m\""
        );
    }

    #[test]
    fn operations_combine() {
        assert!((MetricOperation::Sum.combine(10.0, 3, 5.0) - 15.0).abs() < f64::EPSILON);
        assert!((MetricOperation::Max.combine(10.0, 3, 5.0) - 10.0).abs() < f64::EPSILON);
        assert!((MetricOperation::Min.combine(10.0, 3, 5.0) - 5.0).abs() < f64::EPSILON);
        assert!((MetricOperation::Count.combine(10.0, 3, 500.0) - 11.0).abs() < f64::EPSILON);
    }

    #[test]
    fn first_sample_replaces_empty_extremes() {
        assert!((MetricOperation::Min.combine(0.0, 0, 5.0) - 5.0).abs() < f64::EPSILON);
        assert!((MetricOperation::Max.combine(0.0, 0, -3.0) + 3.0).abs() < f64::EPSILON);
        assert!((MetricOperation::Min.combine(0.0, 1, 5.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn avg_is_a_running_mean() {
        let mut current = 0.0;
        let mut samples = 0;
        for v in [2.0, 4.0, 9.0] {
            current = MetricOperation::Avg.combine(current, samples, v);
            samples += 1;
        }
        assert!((current - 5.0).abs() < 1e-9);
    }

    #[test]
    fn sum_of_zero_is_identity() {
        assert!((MetricOperation::Sum.combine(42.5, 7, 0.0) - 42.5).abs() < f64::EPSILON);
    }

    #[test]
    fn operation_parsing_is_case_insensitive() {
        assert_eq!("SUM".parse::<MetricOperation>().unwrap(), MetricOperation::Sum);
        assert_eq!("count".parse::<MetricOperation>().unwrap(), MetricOperation::Count);
        assert!("median".parse::<MetricOperation>().is_err());
        let op: MetricOperation = serde_json::from_str("\"MAX\"").unwrap();
        assert_eq!(op, MetricOperation::Max);
    }

    #[test]
    fn blank_metric_name_is_invalid() {
        assert!(MetricSpec::new(" ").validate().is_err());
        assert!(MetricSpec::new("api_calls").validate().is_ok());
    }
}
