use std::collections::BTreeMap;

/// Named diagnostic ratios computed by a filter for one document.
pub type ThresholdMap = BTreeMap<String, f64>;

/// Outcome of a filter decision for one document.
///
/// Simple filters return a plain `bool` or `(bool, reason)`; diagnostic filters
/// also attach the values they computed. All shapes convert into this type
/// through `From`, and [`FilterResult::into_parts`] normalizes them.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    pub keep: bool,
    pub reason: Option<String>,
    pub thresholds: Option<ThresholdMap>,
}

impl FilterResult {
    pub fn keep() -> Self {
        Self {
            keep: true,
            reason: None,
            thresholds: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            keep: false,
            reason: Some(reason.into()),
            thresholds: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdMap) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    /// Decompose into `(kept, reason, thresholds)`.
    pub fn into_parts(self) -> (bool, Option<String>, Option<ThresholdMap>) {
        (self.keep, self.reason, self.thresholds)
    }
}

impl From<bool> for FilterResult {
    fn from(keep: bool) -> Self {
        Self {
            keep,
            reason: None,
            thresholds: None,
        }
    }
}

impl From<(bool, &str)> for FilterResult {
    fn from((keep, reason): (bool, &str)) -> Self {
        (keep, reason.to_string()).into()
    }
}

impl From<(bool, String)> for FilterResult {
    fn from((keep, reason): (bool, String)) -> Self {
        Self {
            keep,
            reason: Some(reason),
            thresholds: None,
        }
    }
}

impl From<(bool, ThresholdMap, Option<String>)> for FilterResult {
    fn from((keep, thresholds, reason): (bool, ThresholdMap, Option<String>)) -> Self {
        Self {
            keep,
            reason,
            thresholds: Some(thresholds),
        }
    }
}
