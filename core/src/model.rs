// core/src/model.rs

//! Wire and persisted shapes of a billing order.
//!
//! `OrderEvent` keeps its fields as text on the wire so that consumers that
//! store them verbatim keep working, but it can only be built through
//! validation: counts must be positive integers and amounts non-negative
//! decimals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
  /// Missing, unparseable, `null` or empty body.
  #[error("No data provided")]
  NoData,

  #[error("Order payload must be a JSON object")]
  NotAnObject,

  #[error("Field '{field}' is required")]
  MissingField { field: &'static str },

  #[error("Field '{field}' must be {expected}")]
  InvalidField {
    field: &'static str,
    expected: &'static str,
  },
}

/// Why a queued message could not be turned into an `OrderEvent`.
#[derive(Debug, Error)]
pub enum DecodeError {
  #[error("Message body is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Message body failed validation: {0}")]
  Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
  pub user_id: String,
  pub number_of_items: String,
  pub total_amount: String,
}

impl OrderEvent {
  /// Validates a raw HTTP body.
  pub fn from_body(body: &[u8]) -> Result<Self, ValidationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
      return Err(ValidationError::NoData);
    }
    let value: Value = serde_json::from_slice(body).map_err(|_| ValidationError::NoData)?;
    Self::from_value(&value)
  }

  pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
    let fields = match value {
      Value::Null => return Err(ValidationError::NoData),
      Value::Object(map) if map.is_empty() => return Err(ValidationError::NoData),
      Value::Object(map) => map,
      _ => return Err(ValidationError::NotAnObject),
    };

    Ok(Self {
      user_id: user_id_field(fields)?,
      number_of_items: count_field(fields, "number_of_items")?.to_string(),
      total_amount: amount_field(fields, "total_amount")?.to_string(),
    })
  }

  /// Decodes a queued message body, applying the same rules as the gateway.
  pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
    let value: Value = serde_json::from_slice(payload)?;
    Ok(Self::from_value(&value)?)
  }

  pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(self)
  }
}

fn required<'a>(fields: &'a Map<String, Value>, field: &'static str) -> Result<&'a Value, ValidationError> {
  match fields.get(field) {
    None | Some(Value::Null) => Err(ValidationError::MissingField { field }),
    Some(v) => Ok(v),
  }
}

fn user_id_field(fields: &Map<String, Value>) -> Result<String, ValidationError> {
  const FIELD: &str = "user_id";
  let invalid = ValidationError::InvalidField {
    field: FIELD,
    expected: "a non-empty string or an integer",
  };
  match required(fields, FIELD)? {
    Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
    Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
    _ => Err(invalid),
  }
}

fn count_field(fields: &Map<String, Value>, field: &'static str) -> Result<u32, ValidationError> {
  let invalid = ValidationError::InvalidField {
    field,
    expected: "a positive integer",
  };
  let count = match required(fields, field)? {
    Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
    Value::String(s) => {
      let s = s.trim();
      if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse::<u32>().ok()
      } else {
        None
      }
    }
    _ => None,
  };
  match count {
    Some(c) if c > 0 => Ok(c),
    _ => Err(invalid),
  }
}

fn amount_field(fields: &Map<String, Value>, field: &'static str) -> Result<Decimal, ValidationError> {
  let invalid = ValidationError::InvalidField {
    field,
    expected: "a non-negative decimal amount",
  };
  let text = match required(fields, field)? {
    Value::Number(n) => n.to_string(),
    Value::String(s) => s.trim().to_string(),
    _ => return Err(invalid),
  };
  match Decimal::from_str(&text) {
    Ok(amount) if !amount.is_sign_negative() || amount.is_zero() => Ok(amount),
    _ => Err(invalid),
  }
}

/// A persisted order row. Columns are text, mirroring the wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct OrderRecord {
  pub id: i32,
  pub user_id: String,
  pub number_of_items: String,
  pub total_amount: String,
}
