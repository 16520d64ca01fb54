use log::debug;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{DesignError, Result};
use crate::net::PinRole;
use crate::pin::{resolve_fragments, CanonicalPin, PinSpec};

pub const DEFAULT_PREFIX: &str = "UNK";

/// Opaque handle to a registered archetype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) usize);

/// How a component picks its pin when it is connected as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PinSelector {
    /// The caller has to name a concrete pin
    #[default]
    Explicit,
    /// Use the pin whose name equals the net name, optionally behind a prefix
    NameMatchesNet { prefix: String },
    /// Two-terminal parts: primary role is the first pin, secondary the second
    TwoTerminal,
    /// Parts with one pin answer every primary request with it
    SinglePin,
}

impl PinSelector {
    /// Parse the selector names used in trace files
    pub fn parse(text: &str) -> Option<PinSelector> {
        let (kind, arg) = match text.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (text, None),
        };
        match (kind.to_ascii_lowercase().as_str(), arg) {
            ("explicit", None) => Some(PinSelector::Explicit),
            ("two-terminal", None) => Some(PinSelector::TwoTerminal),
            ("single-pin", None) => Some(PinSelector::SinglePin),
            ("match-net", arg) => Some(PinSelector::NameMatchesNet {
                prefix: arg.unwrap_or("").to_uppercase(),
            }),
            _ => None,
        }
    }

    /// Pick the index of the pin to connect for `role`.
    ///
    /// `net_name` is `None` for nets that have not been named yet.
    pub fn pin_to_connect(
        &self,
        pins: &[CanonicalPin],
        role: PinRole,
        net_name: Option<&str>,
        reversed: bool,
    ) -> std::result::Result<usize, String> {
        match self {
            PinSelector::Explicit => Err(format!(
                "no {} pin can be inferred, name the pin explicitly",
                role
            )),
            PinSelector::NameMatchesNet { prefix } => {
                let net_name = net_name
                    .ok_or_else(|| "pins are matched by net name but the net is anonymous".to_string())?;
                let matches: Vec<usize> = pins
                    .iter()
                    .enumerate()
                    .filter(|(_, pin)| {
                        pin.names.iter().any(|name| {
                            name == net_name || (!prefix.is_empty() && format!("{}{}", prefix, name) == net_name)
                        })
                    })
                    .map(|(i, _)| i)
                    .collect();
                match matches.as_slice() {
                    [only] => Ok(*only),
                    [] => Err(format!("no pin is named after net {}", net_name)),
                    _ => Err(format!("{} pins are named after net {}", matches.len(), net_name)),
                }
            }
            PinSelector::TwoTerminal => {
                if pins.len() < 2 {
                    return Err(format!("expected two pins, found {}", pins.len()));
                }
                let mut mapping = [0, 1];
                if reversed {
                    mapping.reverse();
                }
                match role {
                    PinRole::Primary => Ok(mapping[0]),
                    PinRole::Secondary => Ok(mapping[1]),
                }
            }
            PinSelector::SinglePin => match role {
                PinRole::Primary if !pins.is_empty() => Ok(0),
                PinRole::Primary => Err("part has no pins".to_string()),
                PinRole::Secondary => Err("single pin parts have no secondary pin".to_string()),
            },
        }
    }
}

/// A named component archetype
#[derive(Debug, Clone)]
pub struct Archetype {
    pub name: String,
    pub prefix: String,
    pub parent: Option<ComponentTypeId>,
    pub pins: Vec<PinSpec>,
    pub selector: PinSelector,
    pub value_suffix: Option<String>,
    pub default_part_number: Option<String>,
    resolved: OnceCell<Rc<[CanonicalPin]>>,
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Declaration of an archetype before registration.
///
/// Unset prefix, selector, suffix and default part number are inherited from
/// the parent archetype.
#[derive(Debug, Clone)]
pub struct ArchetypeBuilder {
    name: String,
    parent: Option<ComponentTypeId>,
    prefix: Option<String>,
    pins: Vec<PinSpec>,
    selector: Option<PinSelector>,
    value_suffix: Option<String>,
    default_part_number: Option<String>,
}

impl ArchetypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ArchetypeBuilder {
            name: name.into(),
            parent: None,
            prefix: None,
            pins: Vec::new(),
            selector: None,
            value_suffix: None,
            default_part_number: None,
        }
    }

    pub fn extends(mut self, parent: ComponentTypeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix = Some(prefix.as_ref().to_uppercase());
        self
    }

    pub fn pin(mut self, pin: PinSpec) -> Self {
        self.pins.push(pin);
        self
    }

    pub fn pins(mut self, pins: impl IntoIterator<Item = PinSpec>) -> Self {
        self.pins.extend(pins);
        self
    }

    pub fn selector(mut self, selector: PinSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn value_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.value_suffix = Some(suffix.into());
        self
    }

    pub fn default_part_number(mut self, part_number: impl Into<String>) -> Self {
        self.default_part_number = Some(part_number.into());
        self
    }
}

/// Registry of archetypes, resolving each one's pins at most once.
#[derive(Debug, Clone, Default)]
pub struct ArchetypeRegistry {
    archetypes: Vec<Archetype>,
    by_name: HashMap<String, ComponentTypeId>,
}

impl ArchetypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the common small parts
    pub fn with_standard_parts() -> Self {
        let mut registry = Self::new();
        standard::register(&mut registry).expect("standard archetypes are well formed");
        registry
    }

    pub fn register(&mut self, builder: ArchetypeBuilder) -> Result<ComponentTypeId> {
        if self.by_name.contains_key(&builder.name) {
            return Err(DesignError::InvalidArchetype {
                name: builder.name,
                reason: "an archetype with this name is already registered".to_string(),
            });
        }
        if builder.pins.iter().any(|pin| pin.names.is_empty()) {
            return Err(DesignError::InvalidArchetype {
                name: builder.name,
                reason: "every pin needs at least one name".to_string(),
            });
        }

        let parent = match builder.parent {
            Some(parent_id) => Some(self.archetypes.get(parent_id.0).ok_or_else(|| {
                DesignError::InvalidArchetype {
                    name: builder.name.clone(),
                    reason: format!("parent archetype #{} is not registered", parent_id.0),
                }
            })?),
            None => None,
        };

        let archetype = Archetype {
            prefix: builder
                .prefix
                .or_else(|| parent.map(|p| p.prefix.clone()))
                .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            selector: builder
                .selector
                .or_else(|| parent.map(|p| p.selector.clone()))
                .unwrap_or_default(),
            value_suffix: builder
                .value_suffix
                .or_else(|| parent.and_then(|p| p.value_suffix.clone())),
            default_part_number: builder
                .default_part_number
                .or_else(|| parent.and_then(|p| p.default_part_number.clone())),
            name: builder.name,
            parent: builder.parent,
            pins: builder.pins,
            resolved: OnceCell::new(),
        };

        let id = ComponentTypeId(self.archetypes.len());
        debug!("Registered archetype {} with prefix {}", archetype.name, archetype.prefix);
        self.by_name.insert(archetype.name.clone(), id);
        self.archetypes.push(archetype);
        Ok(id)
    }

    pub fn get(&self, id: ComponentTypeId) -> &Archetype {
        &self.archetypes[id.0]
    }

    pub fn find(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn lookup(&self, name: &str) -> Result<ComponentTypeId> {
        self.find(name)
            .ok_or_else(|| DesignError::UnknownArchetype(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// The archetype followed by its ancestors, most derived first
    pub fn lineage(&self, id: ComponentTypeId) -> Vec<ComponentTypeId> {
        let mut chain = vec![id];
        let mut current = self.get(id).parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.get(parent).parent;
        }
        chain
    }

    /// Canonical pins of an archetype, resolved on first request.
    pub fn resolved_pins(&self, id: ComponentTypeId) -> Result<Rc<[CanonicalPin]>> {
        let archetype = self.get(id);
        if let Some(pins) = archetype.resolved.get() {
            return Ok(Rc::clone(pins));
        }

        let fragments: Vec<PinSpec> = self
            .lineage(id)
            .into_iter()
            .flat_map(|ancestor| self.get(ancestor).pins.iter().cloned())
            .collect();
        let pins = resolve_fragments(&fragments);
        validate_wells(&archetype.name, &pins)?;

        debug!("Resolved {} pins for archetype {}", pins.len(), archetype.name);
        let pins: Rc<[CanonicalPin]> = pins.into();
        Ok(Rc::clone(archetype.resolved.get_or_init(|| pins)))
    }
}

fn validate_wells(archetype: &str, pins: &[CanonicalPin]) -> Result<()> {
    for pin in pins {
        let Some(well_name) = &pin.well else {
            continue;
        };
        let well = pins
            .iter()
            .find(|candidate| candidate.has_name(well_name))
            .ok_or_else(|| DesignError::PinResolution {
                archetype: archetype.to_string(),
                reason: format!("couldn't find voltage well pin {} for pin {}", well_name, pin.name()),
            })?;
        if !well.pin_type.is_power() {
            return Err(DesignError::PinResolution {
                archetype: archetype.to_string(),
                reason: format!(
                    "well pin {} of pin {} is not a power pin (but is {})",
                    well.name(),
                    pin.name(),
                    well.pin_type
                ),
            });
        }
    }
    Ok(())
}

/// Common small parts
pub mod standard {
    use super::*;

    pub fn register(registry: &mut ArchetypeRegistry) -> Result<()> {
        let jelly_bean = registry.register(
            ArchetypeBuilder::new("JellyBean")
                .pin(PinSpec::new(["P1", "1"]))
                .pin(PinSpec::new(["P2", "2"]))
                .selector(PinSelector::TwoTerminal),
        )?;
        registry.register(
            ArchetypeBuilder::new("R")
                .extends(jelly_bean)
                .prefix("R")
                .value_suffix("\u{03A9}"),
        )?;
        let capacitor = registry.register(
            ArchetypeBuilder::new("C")
                .extends(jelly_bean)
                .prefix("C")
                .value_suffix("F"),
        )?;
        registry.register(
            ArchetypeBuilder::new("C_POL")
                .extends(capacitor)
                .pin(PinSpec::new(["+", "P", "PLUS", "P2"]))
                .pin(PinSpec::new(["-", "M", "MINUS", "P1"])),
        )?;
        registry.register(
            ArchetypeBuilder::new("L")
                .extends(jelly_bean)
                .prefix("L")
                .value_suffix("H"),
        )?;
        let diode = registry.register(
            ArchetypeBuilder::new("D")
                .extends(jelly_bean)
                .prefix("D")
                .pin(PinSpec::new(["A", "ANODE", "P1"]))
                .pin(PinSpec::new(["K", "CATHODE", "KATHODE", "P2"])),
        )?;
        registry.register(
            ArchetypeBuilder::new("LED")
                .extends(diode)
                .prefix("LED")
                .pin(PinSpec::new(["A", "+"]))
                .pin(PinSpec::new(["K", "-"])),
        )?;
        registry.register(
            ArchetypeBuilder::new("BJT")
                .prefix("Q")
                .pin(PinSpec::new(["B", "BASE"]))
                .pin(PinSpec::new(["E", "EMITTER"]))
                .pin(PinSpec::new(["C", "COLLECTOR"])),
        )?;
        registry.register(
            ArchetypeBuilder::new("FET")
                .prefix("Q")
                .pin(PinSpec::new(["G", "GATE"]))
                .pin(PinSpec::new(["S", "SOURCE"]))
                .pin(PinSpec::new(["D", "DRAIN"])),
        )?;
        registry.register(
            ArchetypeBuilder::new("TP")
                .prefix("TP")
                .pin(PinSpec::new(["PIN", "P"]))
                .selector(PinSelector::SinglePin)
                .default_part_number("TP"),
        )?;
        Ok(())
    }
}
