//! rdt-detector
//!
//! The delay classifier. Pure: given a journey's rid and a delay record,
//! decides on-time / delayed / cancelled / data-missing. No IO, no clock
//! reads — callers supply everything, including "now" where relevant
//! upstream.

use serde::{Deserialize, Serialize};

/// Raised at construction when a non-positive threshold is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidThreshold(pub i32);

impl std::fmt::Display for InvalidThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "delay threshold must be positive, got {}", self.0)
    }
}

impl std::error::Error for InvalidThreshold {}

pub const DEFAULT_THRESHOLD_MINUTES: i32 = 15;

/// The delay record an upstream batch lookup returns for one rid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayRecord {
    pub rid: String,
    pub total_delay_minutes: i32,
    pub cancelled: bool,
    pub delay_reasons: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionResult {
    pub is_delayed: bool,
    pub is_cancelled: bool,
    pub exceeds_threshold: bool,
    pub claim_eligible: bool,
    pub data_not_found: bool,
    pub total_delay_minutes: i32,
}

impl DetectionResult {
    fn data_missing() -> Self {
        DetectionResult {
            is_delayed: false,
            is_cancelled: false,
            exceeds_threshold: false,
            claim_eligible: false,
            data_not_found: true,
            total_delay_minutes: 0,
        }
    }
}

/// A pure classifier parameterized on the configured delay threshold.
#[derive(Debug, Clone, Copy)]
pub struct DelayDetector {
    threshold_minutes: i32,
}

impl DelayDetector {
    pub fn new(threshold_minutes: i32) -> Result<Self, InvalidThreshold> {
        if threshold_minutes <= 0 {
            return Err(InvalidThreshold(threshold_minutes));
        }
        Ok(DelayDetector { threshold_minutes })
    }

    pub fn with_default_threshold() -> Self {
        DelayDetector { threshold_minutes: DEFAULT_THRESHOLD_MINUTES }
    }

    pub fn threshold_minutes(&self) -> i32 {
        self.threshold_minutes
    }

    /// Finds the record matching `rid` by exact string equality and classifies it.
    /// No match yields a `data_not_found` result with every boolean false.
    pub fn classify<'a>(&self, rid: &str, records: &'a [DelayRecord]) -> DetectionResult {
        match records.iter().find(|r| r.rid == rid) {
            Some(record) => self.classify_record(record),
            None => DetectionResult::data_missing(),
        }
    }

    pub fn classify_record(&self, record: &DelayRecord) -> DetectionResult {
        let is_delayed = record.total_delay_minutes > 0 || record.cancelled;
        let exceeds_threshold = record.total_delay_minutes >= self.threshold_minutes;
        let claim_eligible = exceeds_threshold || record.cancelled;
        DetectionResult {
            is_delayed,
            is_cancelled: record.cancelled,
            exceeds_threshold,
            claim_eligible,
            data_not_found: false,
            total_delay_minutes: record.total_delay_minutes,
        }
    }
}

impl Default for DelayDetector {
    fn default() -> Self {
        Self::with_default_threshold()
    }
}
