//! Capability mapping types.

use super::transforms::{Handler, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Operation an Edge client may perform on a resource path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Get,
    Put,
    Post,
}

impl Operation {
    /// Every operation, in listener installation order.
    pub const ALL: [Operation; 3] = [Operation::Get, Operation::Put, Operation::Post];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "GET",
            Operation::Put => "PUT",
            Operation::Post => "POST",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Operation::Get),
            "PUT" => Ok(Operation::Put),
            "POST" => Ok(Operation::Post),
            other => Err(format!("invalid operation '{}'", other)),
        }
    }
}

/// Edge-side value representation of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Float,
    Int,
    String,
    Boolean,
    Opaque,
}

impl ValueType {
    /// Coerce a transformed value into this representation.
    ///
    /// Values that cannot be coerced are returned unchanged.
    pub fn coerce(&self, value: Value) -> Value {
        match self {
            ValueType::Int => match value.as_f64() {
                Some(n) if value.is_f64() => Value::from(n.round() as i64),
                _ => value,
            },
            ValueType::Float => match value.as_f64() {
                Some(n) => Value::from(n),
                None => value,
            },
            ValueType::String => match value {
                Value::String(_) | Value::Null => value,
                Value::Bool(b) => Value::String(b.to_string()),
                Value::Number(n) => Value::String(n.to_string()),
                other => Value::String(other.to_string()),
            },
            ValueType::Boolean | ValueType::Opaque => value,
        }
    }
}

/// One Edge resource path bound to a capability.
///
/// Operation names and handler/sender references are kept as written so
/// that a malformed entry in a mapping file is reported and skipped at
/// binding time instead of failing the whole file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressEntry {
    pub path: String,
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_sender: Option<String>,
    /// Push the current Bus value shortly after registration.
    #[serde(default)]
    pub init_send: bool,
}

impl AddressEntry {
    /// Create an entry with no operations and a null initial value.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operations: Vec::new(),
            value: Value::Null,
            value_type: None,
            get_handler: None,
            put_handler: None,
            post_handler: None,
            state_sender: None,
            event_sender: None,
            init_send: false,
        }
    }

    pub fn with_operations(mut self, operations: &[Operation]) -> Self {
        self.operations = operations.iter().map(|op| op.as_str().to_string()).collect();
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn with_get_handler(mut self, name: impl Into<String>) -> Self {
        self.get_handler = Some(name.into());
        self
    }

    pub fn with_put_handler(mut self, name: impl Into<String>) -> Self {
        self.put_handler = Some(name.into());
        self
    }

    pub fn with_post_handler(mut self, name: impl Into<String>) -> Self {
        self.post_handler = Some(name.into());
        self
    }

    pub fn with_state_sender(mut self, name: impl Into<String>) -> Self {
        self.state_sender = Some(name.into());
        self
    }

    pub fn with_event_sender(mut self, name: impl Into<String>) -> Self {
        self.event_sender = Some(name.into());
        self
    }

    pub fn with_initial_push(mut self) -> Self {
        self.init_send = true;
        self
    }

    /// Handler reference declared for an operation.
    pub fn handler_for(&self, operation: Operation) -> Option<&str> {
        match operation {
            Operation::Get => self.get_handler.as_deref(),
            Operation::Put => self.put_handler.as_deref(),
            Operation::Post => self.post_handler.as_deref(),
        }
    }

    /// Parse the declared operations, collecting the invalid ones.
    pub fn parsed_operations(&self) -> (Vec<Operation>, Vec<String>) {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for raw in &self.operations {
            match raw.parse::<Operation>() {
                Ok(op) if !valid.contains(&op) => valid.push(op),
                Ok(_) => {}
                Err(_) => invalid.push(raw.clone()),
            }
        }
        (valid, invalid)
    }
}

/// Mapping of one Bus capability onto Edge resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMapping {
    /// Capability name as advertised on the Bus, e.g. `Facades/Dimmable`.
    pub capability: String,
    /// Bus state this capability reads and writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Bus event this capability forwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default)]
    pub entries: Vec<AddressEntry>,
    /// Fixed-value resources, registered once and never updated.
    #[serde(default)]
    pub static_entries: Vec<AddressEntry>,
    #[serde(default)]
    pub handlers: HashMap<String, Handler>,
    #[serde(default)]
    pub senders: HashMap<String, Sender>,
}

impl CapabilityMapping {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            state: None,
            event: None,
            entries: Vec::new(),
            static_entries: Vec::new(),
            handlers: HashMap::new(),
            senders: HashMap::new(),
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_entry(mut self, entry: AddressEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_static_entry(mut self, entry: AddressEntry) -> Self {
        self.static_entries.push(entry);
        self
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn with_sender(mut self, name: impl Into<String>, sender: Sender) -> Self {
        self.senders.insert(name.into(), sender);
        self
    }

    /// Total number of Edge resources this capability contributes.
    pub fn path_count(&self) -> usize {
        self.entries.len() + self.static_entries.len()
    }
}

/// A resource as handed to the Edge at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub path: String,
    pub operations: Vec<Operation>,
    pub value: Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
}

impl ResourceSpec {
    /// Build the registration record for an entry.
    pub fn from_entry(entry: &AddressEntry) -> Self {
        let (operations, _) = entry.parsed_operations();
        Self {
            path: entry.path.clone(),
            operations,
            value: entry.value.clone(),
            value_type: entry.value_type,
        }
    }
}
