use std::collections::BTreeMap;

use crate::types::Value;

/// Payload routed inside an exchange: a body plus headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Message identifier. Copies keep it; correlated copies get a fresh one.
    pub message_id: Option<String>,
    pub body: Value,
    pub headers: BTreeMap<String, Value>,
}

impl Message {
    #[must_use]
    pub fn new(body: impl Into<Value>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<Value> {
        self.headers.remove(name)
    }

    pub fn set_body(&mut self, body: impl Into<Value>) {
        self.body = body.into();
    }

    /// Drops body, headers, and identifier.
    pub fn clear(&mut self) {
        self.message_id = None;
        self.body = Value::Null;
        self.headers.clear();
    }
}
