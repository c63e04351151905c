//! Port records and their classification.

use crate::error::{Error, Result};
use crate::properties::{keys, Properties};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Input,
    Output,
}

impl Direction {
    /// Parse a `port.direction` value. Anything but `"out"` is an input.
    pub fn from_property(value: &str) -> Self {
        if value == "out" {
            Direction::Output
        } else {
            Direction::Input
        }
    }

    pub fn as_property(self) -> &'static str {
        match self {
            Direction::Input => "in",
            Direction::Output => "out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Midi,
}

impl MediaKind {
    /// Classify a `format.dsp` tag by substring. `"audio"` is checked first;
    /// anything matching neither (video, control) is unclassified.
    pub fn from_format(format: &str) -> Option<Self> {
        if format.contains("audio") {
            Some(MediaKind::Audio)
        } else if format.contains("midi") {
            Some(MediaKind::Midi)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Physical,
    Software,
}

/// One of the four buckets of the graph mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    PhysicalAudio,
    PhysicalMidi,
    SoftwareAudio,
    SoftwareMidi,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::PhysicalAudio,
        Category::PhysicalMidi,
        Category::SoftwareAudio,
        Category::SoftwareMidi,
    ];

    pub fn new(origin: Origin, kind: MediaKind) -> Self {
        match (origin, kind) {
            (Origin::Physical, MediaKind::Audio) => Category::PhysicalAudio,
            (Origin::Physical, MediaKind::Midi) => Category::PhysicalMidi,
            (Origin::Software, MediaKind::Audio) => Category::SoftwareAudio,
            (Origin::Software, MediaKind::Midi) => Category::SoftwareMidi,
        }
    }

    pub fn origin(self) -> Origin {
        match self {
            Category::PhysicalAudio | Category::PhysicalMidi => Origin::Physical,
            Category::SoftwareAudio | Category::SoftwareMidi => Origin::Software,
        }
    }

    pub fn kind(self) -> MediaKind {
        match self {
            Category::PhysicalAudio | Category::SoftwareAudio => MediaKind::Audio,
            Category::PhysicalMidi | Category::SoftwareMidi => MediaKind::Midi,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// A single endpoint as last described by the server.
///
/// Built once from a port-info dictionary and never modified afterwards; a
/// later info event for the same id produces a fresh record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub id: u32,
    pub format: String,
    pub port_name: String,
    pub port_alias: String,
    pub object_path: String,
    /// Owning node, in the string form the server sent.
    pub node_id: String,
    pub port_id: String,
    pub physical: bool,
    pub terminal: bool,
    pub monitor: bool,
    pub direction: Direction,
}

impl PortInfo {
    pub fn from_properties(id: u32, props: &Properties) -> Self {
        let text = |key: &str| props.get(key).unwrap_or_default().to_string();
        Self {
            id,
            format: text(keys::FORMAT_DSP),
            port_name: text(keys::PORT_NAME),
            port_alias: text(keys::PORT_ALIAS),
            object_path: text(keys::OBJECT_PATH),
            node_id: text(keys::NODE_ID),
            port_id: text(keys::PORT_ID),
            physical: props.flag(keys::PORT_PHYSICAL),
            terminal: props.flag(keys::PORT_TERMINAL),
            monitor: props.flag(keys::PORT_MONITOR),
            direction: props
                .get(keys::PORT_DIRECTION)
                .map(Direction::from_property)
                .unwrap_or_default(),
        }
    }

    /// `Ok(None)` when the server sent no node id.
    pub fn parsed_node_id(&self) -> Result<Option<u32>> {
        if self.node_id.is_empty() {
            return Ok(None);
        }
        self.node_id
            .parse::<u32>()
            .map(Some)
            .map_err(|_| Error::MalformedNodeId {
                port_id: self.id,
                value: self.node_id.clone(),
            })
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        MediaKind::from_format(&self.format)
    }

    pub fn origin(&self) -> Origin {
        if self.physical {
            Origin::Physical
        } else {
            Origin::Software
        }
    }

    pub fn category(&self) -> Option<Category> {
        self.media_kind()
            .map(|kind| Category::new(self.origin(), kind))
    }

    /// Human-facing label: alias, then name, then object path.
    pub fn display_name(&self) -> &str {
        if !self.port_alias.is_empty() {
            &self.port_alias
        } else if !self.port_name.is_empty() {
            &self.port_name
        } else {
            &self.object_path
        }
    }

    /// Whether `name` refers to this port by name, alias or object path.
    pub fn matches_name(&self, name: &str) -> bool {
        !name.is_empty()
            && (self.port_name == name || self.port_alias == name || self.object_path == name)
    }
}
