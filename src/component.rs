use serde::Serialize;
use std::fmt;

use crate::archetype::{ComponentTypeId, PinSelector};
use crate::net::NetId;
use crate::pin::CanonicalPin;
use crate::provenance::Provenance;

/// Handle to a component inside a design
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ComponentId(pub(crate) usize);

impl ComponentId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One pin of one component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PinRef {
    pub component: ComponentId,
    pub index: usize,
}

/// Designator lifecycle of a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Designator {
    /// Nothing assigned yet
    Pending,
    /// Given by the author
    Explicit(String),
    /// Recovered from the designator history of an earlier run
    Remembered(String),
    Finalized(String),
}

impl Designator {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Designator::Pending => None,
            Designator::Explicit(d) | Designator::Remembered(d) | Designator::Finalized(d) => Some(d),
        }
    }
}

/// Pin of a placed component
#[derive(Debug, Clone)]
pub struct InstancePin {
    pub owner: ComponentId,
    pub canonical: CanonicalPin,
    pub(crate) net: Option<NetId>,
}

impl InstancePin {
    pub fn name(&self) -> &str {
        self.canonical.name()
    }

    pub fn names(&self) -> &[String] {
        &self.canonical.names
    }

    pub fn numbers(&self) -> &[String] {
        &self.canonical.numbers
    }

    pub fn net(&self) -> Option<NetId> {
        self.net
    }
}

/// Arguments of a component instantiation
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub archetype: ComponentTypeId,
    pub designator: Option<String>,
    pub value: Option<String>,
    pub part_number: Option<String>,
    pub populated: bool,
    /// Swap primary and secondary pins for two-terminal parts
    pub reversed: bool,
    /// Connect to this net right after creation
    pub to: Option<NetId>,
    pub provenance: Option<Provenance>,
}

impl ComponentSpec {
    pub fn new(archetype: ComponentTypeId) -> Self {
        ComponentSpec {
            archetype,
            designator: None,
            value: None,
            part_number: None,
            populated: true,
            reversed: false,
            to: None,
            provenance: None,
        }
    }

    pub fn designator(mut self, designator: impl Into<String>) -> Self {
        self.designator = Some(designator.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn part_number(mut self, part_number: impl Into<String>) -> Self {
        self.part_number = Some(part_number.into());
        self
    }

    pub fn not_populated(mut self) -> Self {
        self.populated = false;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    pub fn to(mut self, net: NetId) -> Self {
        self.to = Some(net);
        self
    }

    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }
}

/// A placed component
#[derive(Debug, Clone)]
pub struct ComponentInstance {
    pub id: ComponentId,
    pub archetype: ComponentTypeId,
    pub type_name: String,
    pub prefix: String,
    pub(crate) designator: Designator,
    pub value: String,
    pub part_number: String,
    pub populated: bool,
    pub reversed: bool,
    pub selector: PinSelector,
    pub pins: Vec<InstancePin>,
    pub provenance: Option<Provenance>,
}

impl ComponentInstance {
    pub fn designator_state(&self) -> &Designator {
        &self.designator
    }

    pub fn designator(&self) -> Option<&str> {
        self.designator.as_str()
    }

    /// Designator, or a placeholder such as `R?3` while it is still pending
    pub fn label(&self) -> String {
        match self.designator.as_str() {
            Some(d) => d.to_string(),
            None => format!("{}?{}", self.prefix, self.id.0),
        }
    }

    /// Pin index by name; primary names are checked before aliases
    pub fn pin_index(&self, name: &str) -> Option<usize> {
        let name = name.to_uppercase();
        self.pins
            .iter()
            .position(|pin| pin.name() == name)
            .or_else(|| self.pins.iter().position(|pin| pin.names().contains(&name)))
    }

    pub fn pin_by_name(&self, name: &str) -> Option<&InstancePin> {
        self.pin_index(name).map(|i| &self.pins[i])
    }

    pub fn pin_ref(&self, index: usize) -> PinRef {
        PinRef {
            component: self.id,
            index,
        }
    }

    /// Fully qualified pin name, e.g. `R1.P2`
    pub fn pin_label(&self, index: usize) -> String {
        format!("{}.{}", self.label(), self.pins[index].name())
    }
}

impl fmt::Display for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}{}",
            self.label(),
            self.value,
            if self.populated { "" } else { " DNS" }
        )
    }
}

/// Fill in whichever of value and part number is missing from the other.
pub(crate) fn default_value_and_part_number(
    value: Option<String>,
    part_number: Option<String>,
    value_suffix: Option<&str>,
) -> (String, String) {
    let value = value.map(|v| match value_suffix {
        Some(suffix) if !suffix.is_empty() && !v.ends_with(suffix) => format!("{}{}", v, suffix),
        _ => v,
    });
    match (value, part_number) {
        (Some(value), Some(part_number)) => (value, part_number),
        (Some(value), None) => (value.clone(), value),
        (None, Some(part_number)) => (part_number.clone(), part_number),
        (None, None) => (String::new(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::PinType;

    fn pin(owner: usize, names: &[&str]) -> InstancePin {
        InstancePin {
            owner: ComponentId(owner),
            canonical: CanonicalPin {
                names: names.iter().map(|n| n.to_string()).collect(),
                numbers: vec!["1".to_string()],
                pin_type: PinType::Unknown,
                well: None,
            },
            net: None,
        }
    }

    fn instance() -> ComponentInstance {
        ComponentInstance {
            id: ComponentId(3),
            archetype: ComponentTypeId(0),
            type_name: "D".to_string(),
            prefix: "D".to_string(),
            designator: Designator::Pending,
            value: "1N4148".to_string(),
            part_number: "1N4148".to_string(),
            populated: false,
            reversed: false,
            selector: PinSelector::TwoTerminal,
            pins: vec![pin(3, &["A", "ANODE", "K"]), pin(3, &["K", "CATHODE"])],
            provenance: None,
        }
    }

    #[test]
    fn test_pin_lookup_prefers_primary_name() {
        let part = instance();
        assert_eq!(part.pin_index("k"), Some(1));
        assert_eq!(part.pin_index("anode"), Some(0));
        assert_eq!(part.pin_index("X"), None);
    }

    #[test]
    fn test_labels() {
        let mut part = instance();
        assert_eq!(part.label(), "D?3");
        assert_eq!(part.to_string(), "D?3 - 1N4148 DNS");

        part.designator = Designator::Finalized("D7".to_string());
        assert_eq!(part.pin_label(1), "D7.K");
    }

    #[test]
    fn test_value_defaulting() {
        assert_eq!(
            default_value_and_part_number(Some("10k".into()), None, Some("\u{03A9}")),
            ("10k\u{03A9}".to_string(), "10k\u{03A9}".to_string())
        );
        assert_eq!(
            default_value_and_part_number(None, Some("RC0402".into()), Some("\u{03A9}")),
            ("RC0402".to_string(), "RC0402".to_string())
        );
        assert_eq!(
            default_value_and_part_number(Some("1uF".into()), Some("GRM155".into()), Some("F")),
            ("1uF".to_string(), "GRM155".to_string())
        );
        assert_eq!(
            default_value_and_part_number(None, None, None),
            (String::new(), String::new())
        );
    }
}
