//! String dictionaries attached to graph objects.
//!
//! Every object the server announces (ports, nodes, links) carries a flat
//! `key -> value` dictionary. Values are always strings; numeric and boolean
//! properties are parsed by whoever reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known property keys.
pub mod keys {
    pub const FORMAT_DSP: &str = "format.dsp";
    pub const PORT_NAME: &str = "port.name";
    pub const PORT_ALIAS: &str = "port.alias";
    pub const PORT_ID: &str = "port.id";
    pub const PORT_DIRECTION: &str = "port.direction";
    pub const PORT_PHYSICAL: &str = "port.physical";
    pub const PORT_TERMINAL: &str = "port.terminal";
    pub const PORT_MONITOR: &str = "port.monitor";
    pub const OBJECT_PATH: &str = "object.path";
    pub const NODE_ID: &str = "node.id";
    pub const NODE_NAME: &str = "node.name";

    pub const LINK_OUTPUT_PORT: &str = "link.output.port";
    pub const LINK_INPUT_PORT: &str = "link.input.port";

    pub const MEDIA_TYPE: &str = "media.type";
    pub const MEDIA_CATEGORY: &str = "media.category";
    pub const MEDIA_ROLE: &str = "media.role";
    pub const MEDIA_NAME: &str = "media.name";
    pub const NODE_LOCK_RATE: &str = "node.lock-rate";
    pub const NODE_ALWAYS_PROCESS: &str = "node.always-process";
    pub const NODE_PAUSE_ON_IDLE: &str = "node.pause-on-idle";
    pub const NODE_SUSPEND_ON_IDLE: &str = "node.suspend-on-idle";
}

/// Ordered property dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    items: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a property. Returns the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.items.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.items.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// `true` only when the property is present and exactly `"true"`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Merge `other` into `self`; keys in `other` win.
    pub fn extend(&mut self, other: &Properties) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

/// Build a [`Properties`] dictionary from `key => value` pairs.
///
/// ```
/// use patchbay_graph::{keys, properties};
///
/// let props = properties! {
///     keys::PORT_NAME => "capture_1",
///     keys::PORT_DIRECTION => "out",
/// };
/// assert_eq!(props.get(keys::PORT_NAME), Some("capture_1"));
/// ```
#[macro_export]
macro_rules! properties {
    () => {
        $crate::Properties::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut props = $crate::Properties::new();
        $( props.insert($key, $value); )+
        props
    }};
}
