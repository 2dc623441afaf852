use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Canonical wire form for bucket timestamps: RFC 3339, millisecond precision, `Z` suffix.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_canonical<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&canonical_timestamp(ts))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Ongoing,
    Error,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 3] = [
        TransactionStatus::Success,
        TransactionStatus::Ongoing,
        TransactionStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Ongoing => "ongoing",
            TransactionStatus::Error => "error",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = IngestError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(TransactionStatus::Success),
            "ongoing" => Ok(TransactionStatus::Ongoing),
            "error" => Ok(TransactionStatus::Error),
            _ => Err(IngestError::UnknownStatus(raw.to_string())),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record was refused at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    Json(String),
    MissingTimestamp,
    InvalidTimestamp(String),
    MissingStatus,
    UnknownStatus(String),
}

impl IngestError {
    /// Short machine-readable code for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::Json(_) => "invalid_json",
            IngestError::MissingTimestamp => "missing_timestamp",
            IngestError::InvalidTimestamp(_) => "invalid_timestamp",
            IngestError::MissingStatus => "missing_status",
            IngestError::UnknownStatus(_) => "unknown_status",
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Json(e) => write!(f, "message is not a transaction object: {}", e),
            IngestError::MissingTimestamp => write!(f, "transaction has no timestamp"),
            IngestError::InvalidTimestamp(raw) => write!(f, "unparseable timestamp: {}", raw),
            IngestError::MissingStatus => write!(f, "transaction has no status"),
            IngestError::UnknownStatus(raw) => write!(f, "unknown transaction status: {}", raw),
        }
    }
}

impl std::error::Error for IngestError {}

/// A transaction record as it arrives on the wire. Nothing is trusted yet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub status: Option<Value>,
}

impl RawTransaction {
    pub fn from_value(value: Value) -> Result<Self, IngestError> {
        serde_json::from_value(value).map_err(|e| IngestError::Json(e.to_string()))
    }
}

/// A validated transaction event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionEvent {
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
}

impl TransactionEvent {
    pub fn new(timestamp: DateTime<Utc>, status: TransactionStatus) -> Self {
        Self { timestamp, status }
    }

    /// Decode one live feed message.
    pub fn from_json(text: &str) -> Result<Self, IngestError> {
        let raw: RawTransaction =
            serde_json::from_str(text).map_err(|e| IngestError::Json(e.to_string()))?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawTransaction> for TransactionEvent {
    type Error = IngestError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        let timestamp = match raw.timestamp {
            None | Some(Value::Null) => return Err(IngestError::MissingTimestamp),
            Some(v) => parse_timestamp(&v)?,
        };
        let status = match raw.status {
            None | Some(Value::Null) => return Err(IngestError::MissingStatus),
            Some(Value::String(s)) => s.parse()?,
            Some(other) => return Err(IngestError::UnknownStatus(other.to_string())),
        };
        Ok(Self { timestamp, status })
    }
}

/// Accepts RFC 3339 strings, offset-less ISO strings (read as UTC) and epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, IngestError> {
    let invalid = || IngestError::InvalidTimestamp(value.to_string());
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(ts.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .map(|naive| naive.and_utc())
                .map_err(|_| invalid())
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Response body of the recent-transactions endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Per-minute transaction counts.
///
/// Fields are private so `total == success + ongoing + error` can only be
/// maintained through [`Bucket::record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    #[serde(serialize_with = "serialize_canonical")]
    timestamp: DateTime<Utc>,
    total: u64,
    success: u64,
    ongoing: u64,
    error: u64,
}

impl Bucket {
    /// A bucket holding exactly one event. `timestamp` must already be minute-rounded.
    pub(crate) fn singleton(timestamp: DateTime<Utc>, status: TransactionStatus) -> Self {
        let mut bucket = Self {
            timestamp,
            total: 0,
            success: 0,
            ongoing: 0,
            error: 0,
        };
        bucket.record(status);
        bucket
    }

    pub(crate) fn record(&mut self, status: TransactionStatus) {
        self.total += 1;
        match status {
            TransactionStatus::Success => self.success += 1,
            TransactionStatus::Ongoing => self.ongoing += 1,
            TransactionStatus::Error => self.error += 1,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn success(&self) -> u64 {
        self.success
    }

    pub fn ongoing(&self) -> u64 {
        self.ongoing
    }

    pub fn error(&self) -> u64 {
        self.error
    }

    pub fn count(&self, status: TransactionStatus) -> u64 {
        match status {
            TransactionStatus::Success => self.success,
            TransactionStatus::Ongoing => self.ongoing,
            TransactionStatus::Error => self.error,
        }
    }
}
