use serde::{Deserialize, Serialize};
use std::fmt;

use crate::component::{ComponentId, PinRef};
use crate::provenance::Provenance;

/// Handle to a net inside a design
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NetId(pub(crate) usize);

impl NetId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Intent recorded with each connection, for downstream tooling only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectDirection {
    #[default]
    Unknown,
    In,
    Out,
}

impl ConnectDirection {
    pub fn opposite(&self) -> ConnectDirection {
        match self {
            ConnectDirection::Unknown => ConnectDirection::Unknown,
            ConnectDirection::In => ConnectDirection::Out,
            ConnectDirection::Out => ConnectDirection::In,
        }
    }
}

impl fmt::Display for ConnectDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectDirection::Unknown => f.write_str("unknown"),
            ConnectDirection::In => f.write_str("in"),
            ConnectDirection::Out => f.write_str("out"),
        }
    }
}

/// Which pin a component should offer when it is connected as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PinRole {
    #[default]
    Primary,
    Secondary,
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinRole::Primary => f.write_str("primary"),
            PinRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// Something handed to a connect call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Pin(PinRef),
    /// The pin is inferred through the component's pin selector
    Component(ComponentId),
    /// Never valid, nets can't be connected to nets
    Net(NetId),
}

impl From<PinRef> for Endpoint {
    fn from(pin: PinRef) -> Self {
        Endpoint::Pin(pin)
    }
}

impl From<ComponentId> for Endpoint {
    fn from(component: ComponentId) -> Self {
        Endpoint::Component(component)
    }
}

impl From<NetId> for Endpoint {
    fn from(net: NetId) -> Self {
        Endpoint::Net(net)
    }
}

/// Pins joined by one authoring statement, in the order they were named.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionGroup {
    entries: Vec<(PinRef, ConnectDirection)>,
}

impl ConnectionGroup {
    /// Callers bind each pin once, so a pin never appears twice
    pub(crate) fn push(&mut self, pin: PinRef, direction: ConnectDirection) {
        self.entries.push((pin, direction));
    }

    pub fn pins(&self) -> impl Iterator<Item = PinRef> + '_ {
        self.entries.iter().map(|(pin, _)| *pin)
    }

    pub fn entries(&self) -> &[(PinRef, ConnectDirection)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An electrical node
#[derive(Debug, Clone)]
pub struct Net {
    pub id: NetId,
    name: Option<String>,
    groups: Vec<ConnectionGroup>,
    pub provenance: Option<Provenance>,
}

impl Net {
    pub fn new(id: NetId, name: Option<&str>, provenance: Option<Provenance>) -> Self {
        Net {
            id,
            name: name.map(str::to_uppercase),
            groups: Vec::new(),
            provenance,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_uppercase());
    }

    /// Name for messages, also usable before anonymous nets are named
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("<anonymous net #{}>", self.id.0),
        }
    }

    pub fn groups(&self) -> &[ConnectionGroup] {
        &self.groups
    }

    pub(crate) fn group_mut(&mut self, index: usize) -> &mut ConnectionGroup {
        &mut self.groups[index]
    }

    pub(crate) fn open_group(&mut self) -> usize {
        self.groups.push(ConnectionGroup::default());
        self.groups.len() - 1
    }

    /// Every connected pin, flattened across groups
    pub fn pins(&self) -> impl Iterator<Item = PinRef> + '_ {
        self.groups.iter().flat_map(|group| group.pins())
    }

    pub fn pin_count(&self) -> usize {
        self.groups.iter().map(ConnectionGroup::len).sum()
    }
}

/// Keyword heuristics for supply and ground nets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetClassifier {
    pub power_keywords: Vec<String>,
    pub ground_keywords: Vec<String>,
}

impl Default for NetClassifier {
    fn default() -> Self {
        NetClassifier {
            power_keywords: vec!["VCC".to_string(), "PP".to_string(), "VBUS".to_string()],
            ground_keywords: vec!["GND".to_string()],
        }
    }
}

impl NetClassifier {
    fn matches(name: &str, keywords: &[String]) -> bool {
        let name = name.to_uppercase();
        keywords
            .iter()
            .any(|keyword| name.contains(&keyword.to_uppercase()))
    }

    pub fn is_power(&self, name: &str) -> bool {
        Self::matches(name, &self.power_keywords)
    }

    pub fn is_ground(&self, name: &str) -> bool {
        Self::matches(name, &self.ground_keywords)
    }
}
