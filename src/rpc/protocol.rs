//! Appliance request/response envelope.
//!
//! Every command is a `POST /data` with `{"msg": <command>, "params": {...}}`.
//! The appliance answers `{"msg": <result>}` on success and
//! `{"msg": "Error", "error": <text>}` on failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Command name, e.g. `listdevices`
    pub msg: String,
    /// Command parameters, `{}` when the command takes none
    pub params: Value,
}

impl Request {
    pub fn new(command: impl Into<String>, params: Value) -> Self {
        Self {
            msg: command.into(),
            params: if params.is_null() {
                Value::Object(Default::default())
            } else {
                params
            },
        }
    }
}

/// Decoded reply: either the command result or the appliance's fault.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(Value),
    Err(Fault),
}

/// Application-level errors the appliance reports in the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    PermissionDenied,
    Remote(String),
}

const ERROR_MARKER: &str = "Error";

impl Reply {
    /// Classify a raw response body.
    ///
    /// A body without a `msg` key is passed through whole; older firmware
    /// answers some list commands that way.
    pub fn decode(body: Value) -> Self {
        let Value::Object(mut map) = body else {
            return Reply::Ok(body);
        };

        let Some(msg) = map.remove("msg") else {
            return Reply::Ok(Value::Object(map));
        };

        if msg.as_str() != Some(ERROR_MARKER) {
            return Reply::Ok(msg);
        }

        let error = match map.remove("error") {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        match error.as_str() {
            "Unauthorised" | "Unauthorized" => Reply::Err(Fault::PermissionDenied),
            _ => Reply::Err(Fault::Remote(error)),
        }
    }

    pub fn into_result(self) -> Result<Value, ApiError> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Err(Fault::PermissionDenied) => Err(ApiError::PermissionDenied),
            Reply::Err(Fault::Remote(message)) => Err(ApiError::Remote(message)),
        }
    }
}
