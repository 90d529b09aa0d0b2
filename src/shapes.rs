//! Boundary adapters for the backend's response shapes.
//!
//! The server has shipped several envelopes over time. Each endpoint gets one
//! decoder here so the stores only ever see typed values.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::session::{Message, Role, Sequence, ToolCall, new_id};

pub const GENERIC_FAILURE: &str = "Something went wrong";

pub(crate) fn de_timestamp<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// RFC 3339, or an offset-less ISO timestamp taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Strip a `{success, data}` envelope. A `success: false` body is a logical failure.
pub fn unwrap_envelope(body: Value) -> ClientResult<Value> {
    let Some(success) = body.get("success").and_then(Value::as_bool) else {
        return Ok(body);
    };
    if !success {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or(GENERIC_FAILURE)
            .to_string();
        return Err(ClientError::api(message));
    }
    Ok(body.get("data").cloned().unwrap_or(Value::Null))
}

fn nested<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    v.as_object().and_then(|o| o.get(key))
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

pub fn decode_chat_reply(body: Value) -> ClientResult<ChatReply> {
    let body = unwrap_envelope(body)?;
    let reply = if body.get("content").is_none() {
        nested(&body, "data").cloned().unwrap_or(body)
    } else {
        body
    };
    let Some(obj) = reply.as_object() else {
        return Err(ClientError::Decode("chat reply is not an object".into()));
    };
    let content = obj.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
    let tool_calls = obj
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| match serde_json::from_value::<ToolCall>(c.clone()) {
                    Ok(call) => Some(call),
                    Err(e) => {
                        warn!(error = %e, "decode_chat_reply: dropping malformed tool call");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(ChatReply { content, tool_calls })
}

fn decode_history_entry(v: &Value) -> Option<Message> {
    let obj = v.as_object()?;
    let role = obj.get("role").and_then(Value::as_str).and_then(Role::parse)?;
    let content = obj.get("content").and_then(Value::as_str)?;
    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => new_id(),
    };
    Some(Message { id, role, content: content.to_string(), tool_calls: None })
}

/// History arrives as a bare array, under `data` or `messages` (possibly both),
/// or as a single message object. Malformed entries are skipped.
pub fn decode_history(body: Value) -> ClientResult<Vec<Message>> {
    let body = unwrap_envelope(body)?;
    let mut cursor = &body;
    for _ in 0..2 {
        if cursor.is_array() {
            break;
        }
        match nested(cursor, "data").or_else(|| nested(cursor, "messages")) {
            Some(inner) => cursor = inner,
            None => break,
        }
    }
    let entries: Vec<&Value> = match cursor {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![cursor],
        Value::Null => Vec::new(),
        other => return Err(ClientError::Decode(format!("history is {}", kind(other)))),
    };
    let total = entries.len();
    let messages: Vec<Message> = entries.into_iter().filter_map(decode_history_entry).collect();
    if messages.len() < total {
        debug!(dropped = total - messages.len(), "decode_history: skipped malformed entries");
    }
    Ok(messages)
}

fn order_steps(seq: &mut Value) {
    let Some(steps) = seq.get_mut("steps").and_then(Value::as_array_mut) else {
        return;
    };
    if steps.iter().all(|s| s.get("order").and_then(Value::as_i64).is_some()) {
        steps.sort_by_key(|s| s.get("order").and_then(Value::as_i64).unwrap_or_default());
    }
}

fn sequence_from_value(mut v: Value) -> ClientResult<Sequence> {
    order_steps(&mut v);
    Ok(serde_json::from_value(v)?)
}

pub fn decode_sequence(body: Value) -> ClientResult<Sequence> {
    let body = unwrap_envelope(body)?;
    let inner = if body.get("id").is_none() {
        nested(&body, "data").cloned().unwrap_or(body)
    } else {
        body
    };
    if inner.is_null() {
        return Err(ClientError::NotFound("sequence".into()));
    }
    sequence_from_value(inner)
}

pub fn decode_sequence_list(body: Value) -> ClientResult<Vec<Sequence>> {
    let body = unwrap_envelope(body)?;
    let items = match &body {
        Value::Array(items) => items.clone(),
        _ => nested(&body, "data").and_then(Value::as_array).cloned().unwrap_or_default(),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match sequence_from_value(item) {
            Ok(seq) => Some(seq),
            Err(e) => {
                warn!(error = %e, "decode_sequence_list: dropping malformed entry");
                None
            }
        })
        .collect())
}

/// A pushed `sequence_updated` payload: the record itself or `{result: record}`,
/// with an optional correlation token echoed by the server.
pub fn decode_push_sequence(payload: Value) -> ClientResult<(Sequence, Option<String>)> {
    let origin = ["clientToken", "origin"]
        .iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_str))
        .map(str::to_string);
    let record = match nested(&payload, "result") {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => payload,
    };
    Ok((sequence_from_value(record)?, origin))
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
