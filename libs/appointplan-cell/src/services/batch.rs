// libs/appointplan-cell/src/services/batch.rs
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use shared_database::{BatchEnvelope, BitrixClient};

use crate::models::StoreError;

/// Per-command replies of one or more batch calls, in request order.
pub type BatchReply = BatchEnvelope;

/// The single transport primitive the planner needs from the remote store.
///
/// One call submits at most the store's batch limit of pre-encoded
/// commands; [`execute_batch`] handles anything larger.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn call_batch(&self, commands: &[(String, String)], halt: bool) -> Result<BatchReply, StoreError>;
}

#[async_trait]
impl BatchTransport for BitrixClient {
    async fn call_batch(&self, commands: &[(String, String)], halt: bool) -> Result<BatchReply, StoreError> {
        BitrixClient::call_batch(self, commands, halt)
            .await
            .map_err(|e| StoreError::Transport(format!("{:#}", e)))
    }
}

/// A remote method call with its parameter tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCommand {
    pub method: String,
    pub params: Map<String, Value>,
}

impl BatchCommand {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Serialize as `method?&key=value...` in the store's query-string dialect.
    ///
    /// Lists expand to `key[0]=..&key[1]=..`, objects to `key[sub]=..`, both
    /// recursively. Keys and scalars are percent-encoded with `/` left as is;
    /// booleans use the store's `Y`/`N` flags. Empty lists and objects
    /// produce nothing.
    pub fn encode(&self) -> String {
        let mut out = format!("{}?", self.method);
        for (key, value) in &self.params {
            push_param(&mut out, &encode_text(key), value);
        }
        out
    }

    /// Inverse of [`BatchCommand::encode`]. Every scalar comes back as a
    /// string, and numeric path segments are read as list indices.
    pub fn parse(encoded: &str) -> Result<Self, String> {
        let (method, query) = encoded.split_once('?').unwrap_or((encoded, ""));
        if method.is_empty() {
            return Err(format!("command '{}' has no method", encoded));
        }

        let mut root = Value::Object(Map::new());
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let path = split_key(raw_key)?;
            let value = urlencoding::decode(raw_value)
                .map_err(|e| format!("invalid escape in '{}': {}", pair, e))?
                .into_owned();
            insert_path(&mut root, &path, value)?;
        }

        let params = match root {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(Self {
            method: method.to_string(),
            params,
        })
    }
}

fn push_param(out: &mut String, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                push_param(out, &format!("{}[{}]", prefix, encode_text(key)), nested);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                push_param(out, &format!("{}[{}]", prefix, index), nested);
            }
        }
        scalar => {
            out.push('&');
            out.push_str(prefix);
            out.push('=');
            out.push_str(&encode_text(&scalar_text(scalar)));
        }
    }
}

/// Percent-encode everything except unreserved characters and `/`.
fn encode_text(raw: &str) -> String {
    urlencoding::encode(raw).replace("%2F", "/")
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "Y".to_string(),
        Value::Bool(false) => "N".to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn split_key(raw: &str) -> Result<Vec<String>, String> {
    let (head, mut rest) = match raw.find('[') {
        Some(pos) => (&raw[..pos], &raw[pos..]),
        None => (raw, ""),
    };
    let mut path = vec![decode_segment(head)?];

    while !rest.is_empty() {
        let close = rest
            .find(']')
            .filter(|_| rest.starts_with('['))
            .ok_or_else(|| format!("unbalanced brackets in key '{}'", raw))?;
        path.push(decode_segment(&rest[1..close])?);
        rest = &rest[close + 1..];
    }

    Ok(path)
}

fn decode_segment(segment: &str) -> Result<String, String> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|e| format!("invalid escape in key segment '{}': {}", segment, e))
}

fn insert_path(slot: &mut Value, path: &[String], value: String) -> Result<(), String> {
    let Some((head, rest)) = path.split_first() else {
        *slot = Value::String(value);
        return Ok(());
    };

    if slot.is_null() {
        *slot = if head.parse::<usize>().is_ok() {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        };
    }

    match slot {
        Value::Array(items) => {
            let index: usize = head
                .parse()
                .map_err(|_| format!("key '{}' used inside a list", head))?;
            if index > items.len() {
                return Err(format!("list index {} skips positions", index));
            }
            if index == items.len() {
                items.push(Value::Null);
            }
            insert_path(&mut items[index], rest, value)
        }
        Value::Object(map) => {
            let child = map.entry(head.clone()).or_insert(Value::Null);
            insert_path(child, rest, value)
        }
        _ => Err(format!("key '{}' collides with a scalar value", head)),
    }
}

/// A chunked batch that failed part-way through.
#[derive(Debug)]
pub struct ChunkedBatchError {
    /// Replies of the chunks that completed before the failure.
    pub completed: BatchReply,
    pub source: StoreError,
}

/// Submit named commands in sequential chunks of at most `limit`, merging
/// the replies in request order.
///
/// With `halt` set, execution stops after the first chunk reporting a
/// command error, mirroring the store's own halt behaviour inside a chunk.
pub async fn execute_batch<T>(
    transport: &T,
    commands: &[(String, BatchCommand)],
    limit: usize,
    halt: bool,
) -> Result<BatchReply, ChunkedBatchError>
where
    T: BatchTransport + ?Sized,
{
    let limit = limit.max(1);
    let mut merged = BatchReply::default();

    for (chunk_index, chunk) in commands.chunks(limit).enumerate() {
        let encoded: Vec<(String, String)> = chunk
            .iter()
            .map(|(name, command)| (name.clone(), command.encode()))
            .collect();

        debug!(
            "Executing batch chunk {} with {} commands",
            chunk_index,
            encoded.len()
        );

        let reply = match transport.call_batch(&encoded, halt).await {
            Ok(reply) => reply,
            Err(source) => {
                warn!("Batch chunk {} failed: {}", chunk_index, source);
                return Err(ChunkedBatchError {
                    completed: merged,
                    source,
                });
            }
        };

        let chunk_failed = !reply.result_error.is_empty();
        merged.result.extend(reply.result);
        merged.result_error.extend(reply.result_error);
        merged.result_next.extend(reply.result_next);

        if halt && chunk_failed {
            debug!("Halting batch after chunk {} reported errors", chunk_index);
            break;
        }
    }

    Ok(merged)
}

/// Run list commands to exhaustion, following `result_next` paging.
///
/// Returns every item per command name. Any command-level error aborts the
/// whole read.
pub async fn fetch_lists<T>(
    transport: &T,
    commands: Vec<(String, BatchCommand)>,
    limit: usize,
) -> Result<Map<String, Value>, StoreError>
where
    T: BatchTransport + ?Sized,
{
    let mut collected: Map<String, Value> = commands
        .iter()
        .map(|(name, _)| (name.clone(), Value::Array(Vec::new())))
        .collect();
    let mut pending = commands;

    while !pending.is_empty() {
        let reply = execute_batch(transport, &pending, limit, false)
            .await
            .map_err(|e| e.source)?;

        if let Some((name, error)) = reply.result_error.iter().next() {
            return Err(StoreError::Transport(format!("command '{}' failed: {}", name, error)));
        }

        let mut follow_up = Vec::new();
        for (name, command) in pending {
            let page = reply.result.get(&name).map(list_items).unwrap_or_default();
            if let Some(Value::Array(items)) = collected.get_mut(&name) {
                items.extend(page);
            }

            let Some(next) = reply.result_next.get(&name).and_then(page_offset) else {
                continue;
            };
            let current = command.params.get("start").and_then(page_offset).unwrap_or(0);
            if next <= current {
                warn!("Command '{}' reported a non-advancing page offset {}, stopping", name, next);
                continue;
            }
            debug!("Command '{}' continues at offset {}", name, next);
            follow_up.push((name, command.param("start", next)));
        }
        pending = follow_up;
    }

    Ok(collected)
}

fn page_offset(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// List methods reply with either a bare array or `{"items": [...]}`.
fn list_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
