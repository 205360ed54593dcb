//! Stratum protocol message definitions
//!
//! Newline-delimited JSON-RPC. Miners send `mining.subscribe`,
//! `mining.authorize` and `mining.submit`; the pool pushes `mining.notify`.

use crate::core::Nonce;
use crate::pool::job::JobId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stratum protocol methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StratumMethod {
    Subscribe,
    Authorize,
    Submit,
    /// Server notifies client of new work
    Notify,
    Unknown(String),
}

impl StratumMethod {
    /// Parse method from string
    pub fn parse_method(s: &str) -> Self {
        match s {
            "mining.subscribe" => Self::Subscribe,
            "mining.authorize" => Self::Authorize,
            "mining.submit" => Self::Submit,
            "mining.notify" => Self::Notify,
            _ => Self::Unknown(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Subscribe => "mining.subscribe",
            Self::Authorize => "mining.authorize",
            Self::Submit => "mining.submit",
            Self::Notify => "mining.notify",
            Self::Unknown(s) => s,
        }
    }
}

/// JSON-RPC error codes sent to miners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumErrorCode {
    MethodNotFound,
    InvalidParams,
}

impl StratumErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::MethodNotFound => -3,
            Self::InvalidParams => 20,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
        }
    }
}

/// Stratum request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    /// Positional array or named object
    #[serde(default)]
    pub params: Value,
}

impl StratumRequest {
    pub fn new(id: impl Into<Value>, method: &str, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }

    /// Parse one line received from a miner
    pub fn from_json(line: &str) -> Result<Self> {
        let request: Self = serde_json::from_str(line.trim())?;
        Ok(request)
    }

    pub fn method_enum(&self) -> StratumMethod {
        StratumMethod::parse_method(&self.method)
    }
}

/// Stratum response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumResponse {
    pub id: Value,
    pub result: Value,
    pub error: Value,
}

impl StratumResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: Value::Null,
        }
    }

    /// Error response with the `[code, message, null]` triple
    pub fn error(id: Value, code: StratumErrorCode) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Value::Array(vec![
                Value::Number(code.code().into()),
                Value::String(code.message().to_string()),
                Value::Null,
            ]),
        }
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Stratum notification (no ID)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumNotification {
    pub id: Value,
    pub method: String,
    pub params: Vec<Value>,
}

impl StratumNotification {
    pub fn new(method: StratumMethod, params: Vec<Value>) -> Self {
        Self {
            id: Value::Null,
            method: method.as_str().to_string(),
            params,
        }
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `mining.notify` payload
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyParams {
    pub index: u32,
    pub prehash_hex: String,
    /// 8-byte target, little-endian hex
    pub target_hex: String,
    pub job_id: JobId,
}

impl NotifyParams {
    /// `[index, prehash, target, jobId, "0", "0", "0", "0", true]`
    pub fn to_params(&self) -> Vec<Value> {
        vec![
            Value::from(self.index),
            Value::String(self.prehash_hex.clone()),
            Value::String(self.target_hex.clone()),
            Value::from(self.job_id),
            Value::from("0"),
            Value::from("0"),
            Value::from("0"),
            Value::from("0"),
            Value::Bool(true),
        ]
    }

    pub fn into_notification(self) -> StratumNotification {
        StratumNotification::new(StratumMethod::Notify, self.to_params())
    }
}

/// `mining.authorize` parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeParams {
    pub address: String,
    pub worker_id: String,
}

impl AuthorizeParams {
    pub fn from_value(params: &Value) -> Result<Self> {
        let list = params
            .as_array()
            .ok_or_else(|| Error::protocol("authorize params must be an array"))?;
        let address = list
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("authorize needs an address"))?;
        let worker_id = list.get(1).and_then(Value::as_str).unwrap_or("");
        Ok(Self {
            address: address.trim().to_string(),
            worker_id: worker_id.to_string(),
        })
    }
}

/// `mining.submit` parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitParams {
    pub job_id: JobId,
    pub nonce: Nonce,
    /// Hash reported by the miner; informational only
    pub result: Option<String>,
}

impl SubmitParams {
    /// Accepts `[jobId, nonce, result]` or `{job_id, nonce, result}`
    pub fn from_value(params: &Value) -> Result<Self> {
        let (job_id, nonce, result) = match params {
            Value::Array(list) => (list.first(), list.get(1), list.get(2)),
            Value::Object(map) => (map.get("job_id"), map.get("nonce"), map.get("result")),
            _ => return Err(Error::protocol("submit params must be an array or object")),
        };

        let job_id = job_id
            .and_then(parse_job_id)
            .ok_or_else(|| Error::protocol("submit needs a numeric job id"))?;
        let nonce_hex = nonce
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("submit needs a nonce"))?;
        let nonce = Nonce::from_hex(nonce_hex)
            .map_err(|e| Error::protocol(format!("Bad nonce: {}", e)))?;

        Ok(Self {
            job_id,
            nonce,
            result: result.and_then(Value::as_str).map(str::to_string),
        })
    }
}

fn parse_job_id(value: &Value) -> Option<JobId> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| JobId::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
