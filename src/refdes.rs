//! Reference designator assignment.
//!
//! Components without an explicit designator first try to recover the one
//! they had in an earlier run. Every run stores, next to each designator, a
//! handful of anchors describing the component (where it was declared, which
//! nets it touches, its variable name, type, value and part number). A
//! component that agrees with a stored row on enough anchors inherits that
//! row's designator; everything else is numbered per prefix.

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use log::{debug, info};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::component::Designator;
use crate::design::DesignContext;
use crate::error::{DesignError, Result};
use crate::net::NetId;
use crate::provenance;

pub const ANCHOR_NAMES: [&str; 6] = ["code", "nets", "variable_name", "class", "value", "part_number"];

const DESIGNATOR_COLUMN: &str = "designator";
const LEGACY_DESIGNATOR_COLUMN: &str = "refdes";

/// Fingerprints used to recognise a component across runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Anchors {
    pub code: Option<String>,
    pub nets: Option<String>,
    pub variable_name: Option<String>,
    pub class: Option<String>,
    pub value: Option<String>,
    pub part_number: Option<String>,
}

impl Anchors {
    pub fn fields(&self) -> [Option<&str>; 6] {
        [
            self.code.as_deref(),
            self.nets.as_deref(),
            self.variable_name.as_deref(),
            self.class.as_deref(),
            self.value.as_deref(),
            self.part_number.as_deref(),
        ]
    }

    fn from_fields(fields: [Option<String>; 6]) -> Self {
        let [code, nets, variable_name, class, value, part_number] = fields;
        Anchors {
            code,
            nets,
            variable_name,
            class,
            value,
            part_number,
        }
    }

    /// Number of anchors present on both sides and equal
    pub fn score(&self, other: &Anchors) -> usize {
        self.fields()
            .iter()
            .zip(other.fields().iter())
            .filter(|(mine, theirs)| matches!((mine, theirs), (Some(a), Some(b)) if a == b))
            .count()
    }

    fn mismatches(&self, other: &Anchors) -> Vec<String> {
        ANCHOR_NAMES
            .iter()
            .zip(self.fields().iter().zip(other.fields().iter()))
            .filter(|(_, (mine, theirs))| !matches!((mine, theirs), (Some(a), Some(b)) if a == b))
            .map(|(name, (mine, theirs))| format!("{}: {:?} != {:?}", name, mine, theirs))
            .collect()
    }
}

/// One row of the designator history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnchorRecord {
    pub designator: String,
    pub anchors: Anchors,
}

/// Outcome of a successful history lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub designator: String,
    pub score: usize,
}

/// Designators remembered from an earlier run.
///
/// Matching consumes rows, so no two components can claim the same one.
#[derive(Debug, Clone, Default)]
pub struct RefdesHistory {
    records: Vec<AnchorRecord>,
}

impl RefdesHistory {
    pub fn new(records: Vec<AnchorRecord>) -> Self {
        RefdesHistory { records }
    }

    /// Read the history file; a missing file is an empty history
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        match File::open(path) {
            Ok(file) => {
                let history = Self::read(file, &path.display().to_string())?;
                info!(
                    "Loaded {} remembered designators from {}",
                    history.len(),
                    path.display()
                );
                Ok(history)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No designator history at {}, starting fresh", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn read<R: Read>(reader: R, source: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let designator_column = column(DESIGNATOR_COLUMN)
            .or_else(|| column(LEGACY_DESIGNATOR_COLUMN))
            .ok_or_else(|| DesignError::History {
                path: source.to_string(),
                line: 1,
                reason: format!("missing {} column", DESIGNATOR_COLUMN),
            })?;
        // Columns that are missing count as unknown anchors
        let anchor_columns = ANCHOR_NAMES.map(|name| column(name));

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let line = row.position().map(|p| p.line()).unwrap_or_default();
            let designator = field(&row, Some(designator_column)).ok_or_else(|| DesignError::History {
                path: source.to_string(),
                line,
                reason: "empty designator".to_string(),
            })?;
            records.push(AnchorRecord {
                designator,
                anchors: Anchors::from_fields(anchor_columns.map(|c| field(&row, c))),
            });
        }

        Ok(RefdesHistory { records })
    }

    /// Replace the history file with `records`, atomically
    pub fn write(path: &Path, records: &[AnchorRecord]) -> Result<()> {
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(dir)?;
        Self::write_to(&mut file, records)?;
        file.persist(path).map_err(|e| e.error)?;
        info!("Wrote {} designators to {}", records.len(), path.display());
        Ok(())
    }

    pub fn write_to<W: Write>(writer: W, records: &[AnchorRecord]) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .terminator(Terminator::Any(b'\n'))
            .from_writer(writer);

        let mut header = vec![DESIGNATOR_COLUMN];
        header.extend(ANCHOR_NAMES);
        writer.write_record(&header)?;

        for record in records {
            let mut row = vec![record.designator.as_str()];
            row.extend(record.anchors.fields().iter().map(|f| f.unwrap_or("")));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn records(&self) -> &[AnchorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop rows whose designator is already taken
    pub fn retain_unclaimed(&mut self, claimed: &HashSet<String>) {
        self.records.retain(|record| {
            let keep = !claimed.contains(&record.designator);
            if !keep {
                debug!("Designator {} is claimed explicitly, forgetting its history", record.designator);
            }
            keep
        });
    }

    /// Best scoring row, removed from the history when it clears `threshold`.
    ///
    /// Ties go to the row that comes first in the history.
    pub fn find_match(&mut self, anchors: &Anchors, threshold: f64) -> Option<Match> {
        let mut best: Option<(usize, usize)> = None;
        for (index, record) in self.records.iter().enumerate() {
            let score = anchors.score(&record.anchors);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((index, score));
            }
        }

        let (index, score) = best?;
        let max_score = ANCHOR_NAMES.len();
        if (score as f64) / (max_score as f64) < threshold {
            debug!("Best remembered score {}/{} is too low", score, max_score);
            return None;
        }

        let record = self.records.remove(index);
        if score != max_score {
            debug!(
                "Inexact match ({}/{}) for {}: {}",
                score,
                max_score,
                record.designator,
                anchors.mismatches(&record.anchors).join(", ")
            );
        }
        Some(Match {
            designator: record.designator,
            score,
        })
    }
}

fn field(row: &StringRecord, column: Option<usize>) -> Option<String> {
    column
        .and_then(|c| row.get(c))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn fingerprint(tag: char, parts: &[String]) -> String {
    let digest = format!("{:x}", md5::compute(parts.join("\n").as_bytes()));
    format!("{}{}", tag, &digest[..8])
}

/// Current anchors of the component at `index`
pub(crate) fn component_anchors(design: &mut DesignContext, index: usize) -> Anchors {
    let part = &design.components[index];
    let radius = design.config.context_lines;

    let code = part
        .provenance
        .as_ref()
        .and_then(|p| p.location())
        .and_then(|(file, line)| design.sources.nearby_lines(file, line, radius))
        .map(|lines| fingerprint('c', &lines));

    let mut net_names: Vec<String> = part
        .pins
        .iter()
        .filter_map(|pin| pin.net)
        .filter_map(|net| design.nets[net.0].name().map(str::to_string))
        .collect();
    net_names.sort();
    net_names.dedup();
    let nets = (!net_names.is_empty()).then(|| fingerprint('n', &net_names));

    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    Anchors {
        code,
        nets,
        variable_name: part.provenance.as_ref().and_then(|p| p.name.clone()),
        class: non_empty(&part.type_name),
        value: non_empty(&part.value),
        part_number: non_empty(&part.part_number),
    }
}

/// Give every component its final designator.
///
/// Returns the history rows describing this run, in component order.
pub(crate) fn assign_designators(
    design: &mut DesignContext,
    history: &mut RefdesHistory,
) -> Result<Vec<AnchorRecord>> {
    let anchors: Vec<Anchors> = (0..design.components.len())
        .map(|index| component_anchors(design, index))
        .collect();

    let explicit: HashSet<String> = design
        .components
        .iter()
        .filter_map(|part| match &part.designator {
            Designator::Explicit(d) => Some(d.clone()),
            _ => None,
        })
        .collect();
    history.retain_unclaimed(&explicit);

    let threshold = design.config.match_threshold;
    let mut claimed = explicit;
    for (part, anchors) in design.components.iter_mut().zip(&anchors) {
        if part.designator != Designator::Pending {
            continue;
        }
        let Some(found) = history.find_match(anchors, threshold) else {
            continue;
        };
        if !claimed.insert(found.designator.clone()) {
            return Err(DesignError::DuplicateDesignator {
                designator: found.designator,
                provenance: provenance::label(&part.provenance),
            });
        }
        debug!(
            "Remembering designator {} -> {} ({}/{})",
            part.label(),
            found.designator,
            found.score,
            ANCHOR_NAMES.len()
        );
        part.designator = Designator::Remembered(found.designator);
    }

    // Numbers already taken anywhere in the design are never handed out again
    let mut counters: HashMap<String, u64> = HashMap::new();
    for part in design.components.iter() {
        let Some(number) = part
            .designator
            .as_str()
            .and_then(|d| d.strip_prefix(part.prefix.as_str()))
            .and_then(|n| n.parse::<u64>().ok())
        else {
            continue;
        };
        let counter = counters.entry(part.prefix.clone()).or_insert(1);
        *counter = (*counter).max(number.saturating_add(1));
    }

    let mut named: HashSet<String> = HashSet::new();
    for part in design.components.iter_mut() {
        let designator = match &part.designator {
            Designator::Explicit(d) | Designator::Remembered(d) | Designator::Finalized(d) => d.clone(),
            Designator::Pending => {
                let counter = counters.entry(part.prefix.clone()).or_insert(1);
                let designator = loop {
                    let candidate = format!("{}{}", part.prefix, counter);
                    *counter += 1;
                    if !named.contains(&candidate) && !claimed.contains(&candidate) {
                        break candidate;
                    }
                };
                info!("New designator {} -> {}", part.label(), designator);
                designator
            }
        };

        if !named.insert(designator.clone()) {
            return Err(DesignError::DuplicateDesignator {
                designator,
                provenance: provenance::label(&part.provenance),
            });
        }
        part.designator = Designator::Finalized(designator);
    }

    Ok(design
        .components
        .iter()
        .zip(anchors)
        .map(|(part, anchors)| AnchorRecord {
            designator: part.label(),
            anchors,
        })
        .collect())
}

/// Name nets that are still anonymous after their pins' owners got designators
pub(crate) fn name_anonymous_nets(design: &mut DesignContext) -> Result<()> {
    let prefix = design.config.anonymous_net_prefix.to_uppercase();

    for index in 0..design.nets.len() {
        let net = &design.nets[index];
        if net.has_name() {
            continue;
        }

        let name = match net.pins().next() {
            Some(pin) => format!(
                "{}_{}",
                prefix,
                design.components[pin.component.0]
                    .pin_label(pin.index)
                    .replace('.', "_")
            ),
            None => format!("{}_{}", prefix, index),
        }
        .to_uppercase();

        if design.named_nets.contains_key(&name) {
            return Err(DesignError::DuplicateNetName {
                name,
                provenance: provenance::label(&net.provenance),
            });
        }

        debug!("Naming {} -> {}", net.label(), name);
        design.nets[index].set_name(&name);
        design.named_nets.insert(name, NetId(index));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchors(fields: [&str; 6]) -> Anchors {
        Anchors::from_fields(fields.map(|f| (!f.is_empty()).then(|| f.to_string())))
    }

    fn record(designator: &str, fields: [&str; 6]) -> AnchorRecord {
        AnchorRecord {
            designator: designator.to_string(),
            anchors: anchors(fields),
        }
    }

    #[test]
    fn test_score_ignores_missing_fields() {
        let a = anchors(["c1", "n1", "", "R", "10k", "10k"]);
        let b = anchors(["c1", "n2", "", "R", "10k", "10k"]);
        assert_eq!(a.score(&b), 4);
        assert_eq!(a.score(&a), 5);
    }

    #[test]
    fn test_match_consumes_row() {
        let mut history = RefdesHistory::new(vec![
            record("R1", ["c1", "n1", "r_a", "R", "10k", "10k"]),
            record("R2", ["c2", "n2", "r_b", "R", "1k", "1k"]),
        ]);

        let current = anchors(["c2", "n2", "r_b", "R", "1k", "1k"]);
        let found = history.find_match(&current, 0.6).unwrap();
        assert_eq!(found, Match { designator: "R2".to_string(), score: 6 });
        assert_eq!(history.len(), 1);

        // R2 is gone; R1 only shares the class
        assert!(history.find_match(&current, 0.6).is_none());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_threshold_boundary() {
        let stored = record("C4", ["c1", "n1", "cap", "C", "1u", "GRM"]);

        // 4 of 6 clears 0.6
        let mut history = RefdesHistory::new(vec![stored.clone()]);
        let four = anchors(["c1", "n1", "cap", "C", "2u", "X"]);
        assert_eq!(history.find_match(&four, 0.6).unwrap().designator, "C4");

        // 3 of 6 does not
        let mut history = RefdesHistory::new(vec![stored]);
        let three = anchors(["c1", "n1", "cap", "L", "2u", "X"]);
        assert!(history.find_match(&three, 0.6).is_none());
    }

    #[test]
    fn test_ties_go_to_first_row() {
        let mut history = RefdesHistory::new(vec![
            record("R9", ["c1", "n1", "", "R", "10k", "10k"]),
            record("R3", ["c1", "n1", "", "R", "10k", "10k"]),
        ]);
        let current = anchors(["c1", "n1", "", "R", "10k", "10k"]);
        assert_eq!(history.find_match(&current, 0.6).unwrap().designator, "R9");
        assert_eq!(history.find_match(&current, 0.6).unwrap().designator, "R3");
    }

    #[test]
    fn test_file_format() {
        let records = vec![
            record("R1", ["c0123abcd", "n89abcdef", "r_top", "R", "10k\u{03A9}", "10k\u{03A9}"]),
            record("TP1", ["", "", "", "TP", "TP", "TP"]),
        ];
        let mut buffer = Vec::new();
        RefdesHistory::write_to(&mut buffer, &records).unwrap();

        let text = String::from_utf8(buffer.clone()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("designator\tcode\tnets\tvariable_name\tclass\tvalue\tpart_number")
        );
        assert_eq!(lines.next(), Some("R1\tc0123abcd\tn89abcdef\tr_top\tR\t10k\u{03A9}\t10k\u{03A9}"));
        assert_eq!(lines.next(), Some("TP1\t\t\t\tTP\tTP\tTP"));
        assert!(!text.contains('\r'));

        let history = RefdesHistory::read(buffer.as_slice(), "memory").unwrap();
        assert_eq!(history.records(), records.as_slice());
    }

    #[test]
    fn test_reads_older_column_layouts() {
        let text = "refdes\tclass\tvalue\tcode\nU3\tLDO\t3V3\tc1\n";
        let history = RefdesHistory::read(text.as_bytes(), "memory").unwrap();
        let stored = &history.records()[0];
        assert_eq!(stored.designator, "U3");
        assert_eq!(stored.anchors.class.as_deref(), Some("LDO"));
        assert_eq!(stored.anchors.code.as_deref(), Some("c1"));
        assert_eq!(stored.anchors.nets, None);
    }

    #[test]
    fn test_missing_designator_column() {
        let text = "code\tclass\nc1\tR\n";
        assert!(matches!(
            RefdesHistory::read(text.as_bytes(), "memory"),
            Err(DesignError::History { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = RefdesHistory::load(Some(dir.path().join("absent.refdes_mapping").as_path())).unwrap();
        assert!(history.is_empty());
        assert!(RefdesHistory::load(None).unwrap().is_empty());
    }

    #[test]
    fn test_generated_net_name_clashing_with_user_net() {
        use crate::archetype::ArchetypeRegistry;
        use crate::component::ComponentSpec;
        use crate::config::EngineConfig;

        let mut design = DesignContext::new(
            "clash",
            ArchetypeRegistry::with_standard_parts(),
            EngineConfig::default(),
        );
        design.create_net(Some("ANON_NET_R1_P1"), None).unwrap();
        let r = design.registry().lookup("R").unwrap();
        let r1 = design
            .create_component(ComponentSpec::new(r).designator("R1"))
            .unwrap();
        let pin = design.pin(r1, "P1").unwrap();
        design.pin_net(pin).unwrap();

        let err = name_anonymous_nets(&mut design).unwrap_err();
        assert!(matches!(err, DesignError::DuplicateNetName { ref name, .. } if name == "ANON_NET_R1_P1"));
    }

    #[test]
    fn test_fingerprint_shape() {
        let a = fingerprint('n', &["GND".to_string(), "VCC".to_string()]);
        assert_eq!(a.len(), 9);
        assert!(a.starts_with('n'));
        assert_eq!(a, fingerprint('n', &["GND".to_string(), "VCC".to_string()]));
        assert_ne!(a, fingerprint('n', &["VCC".to_string()]));
    }
}
