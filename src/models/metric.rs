use serde::{Deserialize, Serialize};

/// A reported statistic together with how it was obtained.
///
/// `Degenerate` carries a value produced by a fallback path (neutral fit,
/// zero-variance input); `Insufficient` means nothing was computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Metric<T> {
    Computed { value: T },
    Degenerate { value: T, reason: String },
    Insufficient { n_samples: usize, required: usize },
}

impl<T> Metric<T> {
    pub fn computed(value: T) -> Self {
        Metric::Computed { value }
    }

    pub fn degenerate(value: T, reason: impl Into<String>) -> Self {
        Metric::Degenerate {
            value,
            reason: reason.into(),
        }
    }

    pub fn insufficient(n_samples: usize, required: usize) -> Self {
        Metric::Insufficient {
            n_samples,
            required,
        }
    }

    /// Computed only when `n_samples >= required`
    pub fn require(n_samples: usize, required: usize, f: impl FnOnce() -> Metric<T>) -> Self {
        if n_samples < required {
            Metric::insufficient(n_samples, required)
        } else {
            f()
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Metric::Computed { value } | Metric::Degenerate { value, .. } => Some(value),
            Metric::Insufficient { .. } => None,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Metric::Computed { .. })
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, Metric::Degenerate { .. })
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Metric::Insufficient { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Metric<U> {
        match self {
            Metric::Computed { value } => Metric::Computed { value: f(value) },
            Metric::Degenerate { value, reason } => Metric::Degenerate {
                value: f(value),
                reason,
            },
            Metric::Insufficient {
                n_samples,
                required,
            } => Metric::Insufficient {
                n_samples,
                required,
            },
        }
    }

    pub fn as_ref(&self) -> Metric<&T> {
        match self {
            Metric::Computed { value } => Metric::Computed { value },
            Metric::Degenerate { value, reason } => Metric::Degenerate {
                value,
                reason: reason.clone(),
            },
            Metric::Insufficient {
                n_samples,
                required,
            } => Metric::Insufficient {
                n_samples: *n_samples,
                required: *required,
            },
        }
    }

    /// Short status label for tabular output
    pub fn status(&self) -> &'static str {
        match self {
            Metric::Computed { .. } => "computed",
            Metric::Degenerate { .. } => "degenerate",
            Metric::Insufficient { .. } => "insufficient",
        }
    }
}

impl Metric<f64> {
    /// Non-finite results are reported as degenerate rather than silently passed on
    pub fn from_f64(value: f64, what: &str) -> Self {
        if value.is_finite() {
            Metric::computed(value)
        } else {
            Metric::degenerate(value, format!("{} is not finite", what))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serialized_states_are_distinct() {
        let computed = serde_json::to_value(Metric::computed(0.0)).unwrap();
        let degenerate = serde_json::to_value(Metric::degenerate(0.0, "neutral fit")).unwrap();
        let insufficient = serde_json::to_value(Metric::<f64>::insufficient(3, 10)).unwrap();

        assert_eq!(computed["status"], "computed");
        assert_eq!(degenerate["status"], "degenerate");
        assert_eq!(degenerate["reason"], "neutral fit");
        assert_eq!(insufficient["status"], "insufficient");
        assert_eq!(insufficient["n_samples"], 3);
        assert_eq!(insufficient["required"], 10);
        assert!(insufficient.get("value").is_none());
    }

    #[test]
    fn test_require_and_map() {
        let skipped: Metric<f64> = Metric::require(2, 5, || Metric::computed(1.0));
        assert!(skipped.is_insufficient());
        assert_eq!(skipped.value(), None);

        let kept = Metric::require(5, 5, || Metric::computed(2.0)).map(|v| v * 2.0);
        assert_eq!(kept.value(), Some(&4.0));
    }

    #[test]
    fn test_from_f64() {
        assert!(Metric::from_f64(1.5, "rmse").is_computed());
        let nan = Metric::from_f64(f64::NAN, "r2");
        assert!(nan.is_degenerate());
        assert_eq!(nan.status(), "degenerate");
    }

    #[test]
    fn test_round_trip_tagging() {
        let json = r#"{"status":"insufficient","n_samples":4,"required":20}"#;
        let metric: Metric<f64> = serde_json::from_str(json).unwrap();
        assert_eq!(metric, Metric::insufficient(4, 20));
    }
}
