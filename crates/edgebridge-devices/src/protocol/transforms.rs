//! Value transforms between the Bus and the Edge.
//!
//! [`Handler`]s turn an inbound Edge request into a [`BusAction`];
//! [`Sender`]s turn an outbound Bus value into its Edge representation.
//! Both are plain data so mapping tables can be loaded from files.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Errors raised while transforming an inbound value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("arg must be boolean(0,1), got {0}")]
    NotBoolean(String),

    #[error("arg must be numeric, got {0}")]
    NotNumeric(String),

    #[error("malformed hsl value: {0}")]
    MalformedHsl(String),

    #[error("handler requires a state but the capability declares none")]
    MissingState,
}

/// Inbound transform: what to do on the Bus when the Edge touches a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Handler {
    /// Read the capability state.
    GetState,
    /// Write the inbound value to the capability state unchanged.
    SetState,
    /// Write `value / divisor`.
    SetScaled { divisor: f64 },
    /// Accept `1`/`0` and write `on`/`off` respectively.
    SetBoolean { on: Value, off: Value },
    /// Parse `"h,s,l"` with each component in 0..=1.
    SetHsl,
    /// Invoke a device command with the inbound value as its argument.
    CallCommand { command: String },
}

/// A Bus operation produced by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum BusAction {
    Get { state: String },
    Set { state: String, value: Value },
    Call { command: String, args: Vec<Value> },
}

impl BusAction {
    /// The state this action reads or writes, if any.
    pub fn state(&self) -> Option<&str> {
        match self {
            BusAction::Get { state } | BusAction::Set { state, .. } => Some(state),
            BusAction::Call { .. } => None,
        }
    }
}

impl Handler {
    /// Whether the handler needs the capability to declare a state.
    pub fn needs_state(&self) -> bool {
        !matches!(self, Handler::CallCommand { .. })
    }

    /// Translate an inbound Edge value into a Bus action.
    pub fn prepare(&self, state: Option<&str>, value: &Value) -> Result<BusAction, TransformError> {
        let state = || {
            state
                .map(str::to_string)
                .ok_or(TransformError::MissingState)
        };
        match self {
            Handler::GetState => Ok(BusAction::Get { state: state()? }),
            Handler::SetState => Ok(BusAction::Set {
                state: state()?,
                value: value.clone(),
            }),
            Handler::SetScaled { divisor } => {
                let n = as_number(value).ok_or_else(|| TransformError::NotNumeric(render(value)))?;
                Ok(BusAction::Set {
                    state: state()?,
                    value: json!(n / divisor),
                })
            }
            Handler::SetBoolean { on, off } => {
                let flag = as_flag(value).ok_or_else(|| TransformError::NotBoolean(render(value)))?;
                Ok(BusAction::Set {
                    state: state()?,
                    value: if flag { on.clone() } else { off.clone() },
                })
            }
            Handler::SetHsl => Ok(BusAction::Set {
                state: state()?,
                value: parse_hsl(value)?,
            }),
            Handler::CallCommand { command } => Ok(BusAction::Call {
                command: command.clone(),
                args: vec![value.clone()],
            }),
        }
    }
}

/// Outbound transform: Bus value to Edge value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sender {
    Identity,
    /// Multiply by `factor`.
    Scale { factor: f64 },
    /// `true` when the value equals `value`.
    Equals { value: Value },
    /// Truthiness as a boolean, or as `1`/`0` when `numeric`.
    Truthy { numeric: bool },
    /// `{h,s,l}` as `"h,s,l"`.
    HslString,
    /// A list as `"[a,b,c]"`.
    BracketList,
}

impl Sender {
    /// Transform a Bus value; `None` means there is nothing to push.
    pub fn apply(&self, value: &Value) -> Option<Value> {
        match self {
            Sender::Identity => (!value.is_null()).then(|| value.clone()),
            Sender::Scale { factor } => as_number(value).map(|n| json!(n * factor)),
            Sender::Equals { value: expected } => Some(Value::Bool(value == expected)),
            Sender::Truthy { numeric } => {
                let truthy = is_truthy(value);
                Some(if *numeric {
                    json!(if truthy { 1 } else { 0 })
                } else {
                    Value::Bool(truthy)
                })
            }
            Sender::HslString => {
                let obj = value.as_object()?;
                let h = obj.get("h")?.as_f64()?;
                let s = obj.get("s")?.as_f64()?;
                let l = obj.get("l")?.as_f64()?;
                Some(Value::String(format!("{},{},{}", h, s, l)))
            }
            Sender::BracketList => match value {
                Value::Null => None,
                Value::Array(items) => {
                    let joined: Vec<String> = items.iter().map(render).collect();
                    Some(Value::String(format!("[{}]", joined.join(","))))
                }
                other => Some(Value::String(format!("[{}]", render(other)))),
            },
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Some(true),
            Some(x) if x == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|x| x != 0.0 && !x.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn parse_hsl(value: &Value) -> Result<Value, TransformError> {
    let malformed = || TransformError::MalformedHsl(render(value));
    let parts: Vec<f64> = match value {
        Value::String(s) => s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| malformed())?,
        Value::Object(obj) => ["h", "s", "l"]
            .iter()
            .map(|key| obj.get(*key).and_then(Value::as_f64))
            .collect::<Option<_>>()
            .ok_or_else(malformed)?,
        _ => return Err(malformed()),
    };
    if parts.len() != 3 || parts.iter().any(|p| !(0.0..=1.0).contains(p)) {
        return Err(malformed());
    }
    let mut hsl = Map::new();
    hsl.insert("h".into(), json!(parts[0]));
    hsl.insert("s".into(), json!(parts[1]));
    hsl.insert("l".into(), json!(parts[2]));
    Ok(Value::Object(hsl))
}
