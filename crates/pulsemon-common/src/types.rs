use serde::{Deserialize, Serialize};

/// Metric kind, serialized as `"gauge"` / `"counter"`.
///
/// # Examples
///
/// ```
/// use pulsemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(MetricError::UnknownKind(s.to_string())),
        }
    }
}

/// Validation failures for metrics arriving from the outside world.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("metric id is required")]
    EmptyId,

    #[error("metric type is required")]
    MissingKind,

    #[error("unknown metric type '{0}'")]
    UnknownKind(String),

    #[error("gauge '{0}' has no value")]
    MissingValue(String),

    #[error("counter '{0}' has no delta")]
    MissingDelta(String),

    #[error("invalid {kind} value '{raw}'")]
    InvalidValue { kind: MetricKind, raw: String },
}

/// A single named metric as it travels between agent, server and storage.
///
/// Exactly one payload is meaningful: `value` for gauges, `delta` for
/// counters. Use [`Metric::validate`] before storing or sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Parses the plaintext value of the path-encoded update route.
    ///
    /// ```
    /// use pulsemon_common::types::{Metric, MetricKind};
    ///
    /// let m = Metric::parse(MetricKind::Gauge, "Alloc", "123.5").unwrap();
    /// assert_eq!(m.value, Some(123.5));
    /// assert!(Metric::parse(MetricKind::Counter, "PollCount", "1.5").is_err());
    /// ```
    pub fn parse(kind: MetricKind, id: &str, raw: &str) -> Result<Self, MetricError> {
        if id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        let invalid = || MetricError::InvalidValue {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| Metric::gauge(id, v))
                .ok_or_else(invalid),
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(|d| Metric::counter(id, d))
                .map_err(|_| invalid()),
        }
    }

    /// Checks the id and the kind-selected payload. Gauges must be finite.
    pub fn validate(&self) -> Result<(), MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        match self.kind {
            MetricKind::Gauge if self.value.is_none() => {
                Err(MetricError::MissingValue(self.id.clone()))
            }
            MetricKind::Counter if self.delta.is_none() => {
                Err(MetricError::MissingDelta(self.id.clone()))
            }
            MetricKind::Gauge => match self.value {
                // NaN and infinities have no JSON or SQL representation.
                Some(v) if !v.is_finite() => Err(MetricError::InvalidValue {
                    kind: self.kind,
                    raw: v.to_string(),
                }),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Plaintext rendering of the payload, as served by `GET /value/...`.
    pub fn value_string(&self) -> Option<String> {
        match self.kind {
            MetricKind::Gauge => self.value.map(|v| v.to_string()),
            MetricKind::Counter => self.delta.map(|d| d.to_string()),
        }
    }
}

/// Loosely-typed metric as decoded from request bodies.
///
/// Every field is optional so that handlers can tell a missing field from an
/// unknown kind and answer with the right status code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMetric {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub delta: Option<i64>,
    #[serde(default)]
    pub value: Option<f64>,
}

impl RawMetric {
    /// Resolves only the kind, for lookups that carry no payload.
    pub fn parse_kind(&self) -> Result<MetricKind, MetricError> {
        match self.kind.as_deref() {
            None | Some("") => Err(MetricError::MissingKind),
            Some(kind) => kind.parse(),
        }
    }

    pub fn into_metric(self) -> Result<Metric, MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        let kind = self.parse_kind()?;
        let metric = match kind {
            MetricKind::Gauge => Metric {
                id: self.id,
                kind,
                delta: None,
                value: self.value,
            },
            MetricKind::Counter => Metric {
                id: self.id,
                kind,
                delta: self.delta,
                value: None,
            },
        };
        metric.validate()?;
        Ok(metric)
    }
}
