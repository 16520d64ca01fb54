use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Electrical type of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinType {
    #[default]
    Unknown,
    Primary,
    Secondary,
    PowerIn,
    PowerOut,
    Ground,
    Input,
    Output,
}

impl PinType {
    pub fn is_power(&self) -> bool {
        matches!(self, PinType::PowerIn | PinType::PowerOut)
    }

    pub fn parse(name: &str) -> Option<PinType> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "unknown" => Some(PinType::Unknown),
            "primary" => Some(PinType::Primary),
            "secondary" => Some(PinType::Secondary),
            "power-in" | "power-input" => Some(PinType::PowerIn),
            "power-out" | "power-output" => Some(PinType::PowerOut),
            "ground" | "gnd" => Some(PinType::Ground),
            "input" | "in" => Some(PinType::Input),
            "output" | "out" => Some(PinType::Output),
            _ => None,
        }
    }
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PinType::Unknown => "unknown",
            PinType::Primary => "primary",
            PinType::Secondary => "secondary",
            PinType::PowerIn => "power-in",
            PinType::PowerOut => "power-out",
            PinType::Ground => "ground",
            PinType::Input => "input",
            PinType::Output => "output",
        };
        f.write_str(name)
    }
}

/// One partial declaration of a pin.
///
/// Several fragments, possibly from different archetypes in an inheritance
/// chain, may describe the same physical pin. Fragments that share any name
/// are merged into a single [`CanonicalPin`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PinSpec {
    pub names: Vec<String>,
    pub numbers: Vec<String>,
    pub pin_type: Option<PinType>,
    pub well: Option<String>,
}

impl PinSpec {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        PinSpec {
            names: names
                .into_iter()
                .map(|name| name.as_ref().to_uppercase())
                .collect(),
            ..Default::default()
        }
    }

    pub fn number(mut self, number: impl Into<String>) -> Self {
        self.numbers.push(number.into());
        self
    }

    pub fn numbers<I, S>(mut self, numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.numbers.extend(numbers.into_iter().map(Into::into));
        self
    }

    pub fn pin_type(mut self, pin_type: PinType) -> Self {
        self.pin_type = Some(pin_type);
        self
    }

    pub fn well(mut self, well: impl AsRef<str>) -> Self {
        self.well = Some(well.as_ref().to_uppercase());
        self
    }

    /// Two fragments describe the same pin if any of their names match
    pub fn shares_name_with(&self, other: &PinSpec) -> bool {
        self.names.iter().any(|name| other.names.contains(name))
    }
}

/// Fully merged description of one pin of an archetype.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalPin {
    pub names: Vec<String>,
    pub numbers: Vec<String>,
    pub pin_type: PinType,
    pub well: Option<String>,
}

impl CanonicalPin {
    /// Primary name
    pub fn name(&self) -> &str {
        &self.names[0]
    }

    pub fn number(&self) -> Option<&str> {
        self.numbers.first().map(String::as_str)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}

/// Split fragments into equivalence classes under "shares any name".
///
/// Fragments are consumed front to back. Each class starts with the first
/// remaining fragment and keeps pulling in matches for each member in turn,
/// so names chain through intermediate fragments.
pub fn gather_fragments(fragments: &[PinSpec]) -> Vec<Vec<PinSpec>> {
    let mut pool: Vec<PinSpec> = fragments.to_vec();
    let mut classes = Vec::new();

    while !pool.is_empty() {
        let mut same_pin = vec![pool.remove(0)];
        let mut cursor = 0;
        while cursor < same_pin.len() {
            match pool.iter().position(|f| f.shares_name_with(&same_pin[cursor])) {
                Some(i) => same_pin.push(pool.remove(i)),
                None => cursor += 1,
            }
        }
        classes.push(same_pin);
    }

    classes
}

/// Merge one equivalence class into a canonical pin.
///
/// Names are deduplicated in first-seen order and numbers are concatenated.
/// For the remaining attributes the fragment nearest the front wins.
pub fn merge_fragments(fragments: &[PinSpec]) -> CanonicalPin {
    let mut seen = HashSet::new();
    let names: Vec<String> = fragments
        .iter()
        .flat_map(|f| f.names.iter())
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect();

    let numbers = fragments
        .iter()
        .flat_map(|f| f.numbers.iter().cloned())
        .collect();

    let pin_type = fragments
        .iter()
        .find_map(|f| f.pin_type)
        .unwrap_or_default();
    let well = fragments.iter().find_map(|f| f.well.clone());

    CanonicalPin {
        names,
        numbers,
        pin_type,
        well,
    }
}

/// Resolve fragments (most derived archetype first) into canonical pins,
/// numbering any pin that ended up without an explicit number by its
/// 1-based position.
pub fn resolve_fragments(fragments: &[PinSpec]) -> Vec<CanonicalPin> {
    let mut pins: Vec<CanonicalPin> = gather_fragments(fragments)
        .iter()
        .filter(|class| class.iter().any(|f| !f.names.is_empty()))
        .map(|class| merge_fragments(class))
        .collect();

    for (i, pin) in pins.iter_mut().enumerate() {
        if pin.numbers.is_empty() {
            pin.numbers.push((i + 1).to_string());
        }
    }

    pins
}
