//! Purpose: Model which connections a message targets and decode it from relay payloads.
//! Exports: `Selector`, `Packet`, `Protocol`, `decode_packet`.
//! Role: Single closed sum type shared by the endpoint, the resolver and the forwarder.
//! Invariants: Both wire variants (legacy `type`-tagged, data-driven) decode into `Selector`.
//! Invariants: A packet without a truthy `msg` never decodes.
use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

use super::error::{Error, ErrorKind};

pub const INVALID_DATA_STRUCTURE: &str = "invalid data structure";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Selector {
    All,
    One(String),
    /// Duplicates are tolerated; order is only kept for echoing residuals.
    Many(Vec<String>),
    Group {
        names: BTreeSet<String>,
        except: BTreeSet<String>,
    },
}

impl Selector {
    pub fn group<N, E>(names: N, except: E) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Selector::Group {
            names: names.into_iter().map(Into::into).collect(),
            except: except.into_iter().map(Into::into).collect(),
        }
    }

    /// Name reported in peer errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Selector::All => "broadcast",
            Selector::One(_) => "spark",
            Selector::Many(_) => "sparks",
            Selector::Group { .. } => "rooms",
        }
    }

    /// Encode as the data-driven request body sent to a peer's endpoint.
    pub fn to_packet(&self, msg: &Value) -> Value {
        match self {
            Selector::All => json!({ "msg": msg }),
            Selector::One(id) => json!({ "msg": msg, "sparks": id }),
            Selector::Many(ids) => json!({ "msg": msg, "sparks": ids }),
            Selector::Group { names, except } => {
                json!({ "msg": msg, "rooms": names, "except": except })
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    /// `{type, id?, ids?, msg}`; replies carry no count.
    Legacy,
    /// `{msg, sparks?, rooms?, except?}`; replies carry `send`.
    DataDriven,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub protocol: Protocol,
    pub msg: Value,
    pub selector: Selector,
}

/// Decode a buffered request body.
///
/// `rooms_enabled` reflects whether a group lookup is attached; without one the
/// `rooms` field is ignored and selection falls back to `sparks`.
pub fn decode_packet(raw: &str, rooms_enabled: bool) -> Result<Packet, Error> {
    let value: Value = serde_json::from_str(raw).map_err(|err| malformed().with_source(err))?;
    let Value::Object(mut data) = value else {
        return Err(malformed());
    };
    let msg = match data.remove("msg") {
        Some(msg) if is_truthy(&msg) => msg,
        _ => return Err(malformed()),
    };

    if let Some(kind) = data.get("type") {
        let selector = decode_legacy(kind, &data)?;
        return Ok(Packet {
            protocol: Protocol::Legacy,
            msg,
            selector,
        });
    }

    Ok(Packet {
        protocol: Protocol::DataDriven,
        msg,
        selector: decode_data_driven(&data, rooms_enabled),
    })
}

fn decode_legacy(kind: &Value, data: &Map<String, Value>) -> Result<Selector, Error> {
    match kind.as_str() {
        Some("broadcast") => Ok(Selector::All),
        Some("spark") => match data.get("id") {
            Some(Value::String(id)) => Ok(Selector::One(id.clone())),
            _ => Err(malformed()),
        },
        Some("sparks") => match data.get("ids") {
            Some(Value::Array(ids)) => Ok(Selector::Many(strings(ids))),
            _ => Err(malformed()),
        },
        _ => Err(malformed()),
    }
}

fn decode_data_driven(data: &Map<String, Value>, rooms_enabled: bool) -> Selector {
    if rooms_enabled {
        if let Some(rooms) = data.get("rooms") {
            let except = data.get("except").map(string_set).unwrap_or_default();
            return Selector::Group {
                names: string_set(rooms),
                except,
            };
        }
    }

    match data.get("sparks") {
        Some(Value::Array(ids)) => Selector::Many(strings(ids)),
        Some(Value::String(id)) if !id.is_empty() => Selector::One(id.clone()),
        _ => Selector::All,
    }
}

fn strings(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect()
}

fn string_set(value: &Value) -> BTreeSet<String> {
    match value {
        Value::String(name) if !name.is_empty() => BTreeSet::from([name.clone()]),
        Value::Array(values) => strings(values).into_iter().collect(),
        _ => BTreeSet::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn malformed() -> Error {
    Error::new(ErrorKind::MalformedPayload).with_message(INVALID_DATA_STRUCTURE)
}
