use anyhow::{Context, Result};
use colored::*;
use csv::Writer;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::design::FinalizedDesign;
use crate::net::ConnectDirection;

/// Serializable view of a finalized design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignReport {
    pub title: String,
    pub components: Vec<ComponentReport>,
    pub nets: Vec<NetReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentReport {
    pub designator: String,
    pub class: String,
    pub value: String,
    pub part_number: String,
    pub populated: bool,
    pub pins: Vec<PinReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinReport {
    pub name: String,
    pub aliases: Vec<String>,
    pub numbers: Vec<String>,
    pub net: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub pin: String,
    pub direction: ConnectDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetReport {
    pub name: String,
    pub groups: Vec<Vec<GroupEntry>>,
    pub pins: Vec<String>,
    pub is_power: bool,
    pub is_ground: bool,
}

impl DesignReport {
    pub fn from_design(design: &FinalizedDesign) -> Self {
        let components = design
            .components()
            .iter()
            .map(|part| ComponentReport {
                designator: part.label(),
                class: part.type_name.clone(),
                value: part.value.clone(),
                part_number: part.part_number.clone(),
                populated: part.populated,
                pins: part
                    .pins
                    .iter()
                    .map(|pin| PinReport {
                        name: pin.name().to_string(),
                        aliases: pin.names()[1..].to_vec(),
                        numbers: pin.numbers().to_vec(),
                        net: pin.net().map(|net| design.net_name(net).to_string()),
                    })
                    .collect(),
            })
            .collect();

        let nets = design
            .nets()
            .iter()
            .map(|net| NetReport {
                name: design.net_name(net.id).to_string(),
                groups: net
                    .groups()
                    .iter()
                    .map(|group| {
                        group
                            .entries()
                            .iter()
                            .map(|(pin, direction)| GroupEntry {
                                pin: design.pin_label(*pin),
                                direction: *direction,
                            })
                            .collect()
                    })
                    .collect(),
                pins: net.pins().map(|pin| design.pin_label(pin)).collect(),
                is_power: design.is_power(net.id),
                is_ground: design.is_ground(net.id),
            })
            .collect();

        DesignReport {
            title: design.title().to_string(),
            components,
            nets,
        }
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file '{}'", path.display()))?;
    Ok(BufWriter::new(file))
}

pub fn write_json<W: Write>(report: &DesignReport, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

pub fn export_json(report: &DesignReport, path: &Path) -> Result<()> {
    let mut writer = create(path)?;
    write_json(report, &mut writer)?;
    writer.flush()?;
    info!("Design exported to JSON: {}", path.display());
    Ok(())
}

/// One row per component pin
pub fn write_csv<W: Write>(report: &DesignReport, writer: W) -> Result<()> {
    let mut writer = Writer::from_writer(writer);
    writer.write_record(["designator", "pin", "numbers", "net"])?;

    for component in &report.components {
        for pin in &component.pins {
            writer.write_record([
                component.designator.as_str(),
                pin.name.as_str(),
                pin.numbers.join(",").as_str(),
                pin.net.as_deref().unwrap_or(""),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

pub fn export_csv(report: &DesignReport, path: &Path) -> Result<()> {
    write_csv(report, create(path)?)?;
    info!("Design exported to CSV: {}", path.display());
    Ok(())
}

fn paint(text: &str, color: bool, style: impl Fn(&str) -> ColoredString) -> String {
    if color {
        style(text).to_string()
    } else {
        text.to_string()
    }
}

/// Human readable summary
pub fn write_text<W: Write>(report: &DesignReport, mut writer: W, color: bool) -> io::Result<()> {
    let title = if report.title.is_empty() {
        "untitled"
    } else {
        report.title.as_str()
    };
    writeln!(writer, "{}", paint(&format!("=== {} ===", title), color, |s| s.bold()))?;

    writeln!(writer, "\nComponents: {}", report.components.len())?;
    for component in &report.components {
        let dns = if component.populated {
            String::new()
        } else {
            format!(" {}", paint("DNS", color, |s| s.yellow()))
        };
        writeln!(
            writer,
            "  {:<8} {:<12} {}{}",
            paint(&component.designator, color, |s| s.bright_blue()),
            component.class,
            component.value,
            dns
        )?;
    }

    writeln!(writer, "\nNets: {}", report.nets.len())?;
    for net in &report.nets {
        let name = if net.is_power {
            paint(&net.name, color, |s| s.red())
        } else if net.is_ground {
            paint(&net.name, color, |s| s.green())
        } else {
            net.name.clone()
        };
        writeln!(writer, "  {}: {}", name, net.pins.join(", "))?;
    }
    Ok(())
}

pub fn export_text(report: &DesignReport, path: &Path) -> Result<()> {
    let mut writer = create(path)?;
    write_text(report, &mut writer, false)?;
    writer.flush()?;
    info!("Design summary written to: {}", path.display());
    Ok(())
}

pub fn print_summary(report: &DesignReport) {
    let stdout = io::stdout();
    if let Err(e) = write_text(report, stdout.lock(), true) {
        warn!("Failed to print summary: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::ArchetypeRegistry;
    use crate::component::ComponentSpec;
    use crate::config::EngineConfig;
    use crate::design::DesignContext;

    fn report() -> DesignReport {
        let mut design = DesignContext::new(
            "Filter",
            ArchetypeRegistry::with_standard_parts(),
            EngineConfig::default(),
        );
        let vcc = design.create_net(Some("VCC"), None).unwrap();
        let gnd = design.create_net(Some("GND"), None).unwrap();
        let r = design.registry().lookup("R").unwrap();
        let c = design.registry().lookup("C").unwrap();
        let r1 = design.create_component(ComponentSpec::new(r).value("1k")).unwrap();
        let c1 = design
            .create_component(ComponentSpec::new(c).value("1u").not_populated().to(gnd))
            .unwrap();

        let r1_p1 = design.pin(r1, "P1").unwrap();
        let r1_p2 = design.pin(r1, "P2").unwrap();
        let c1_p1 = design.pin(c1, "P1").unwrap();
        design.connect_in(vcc, &[r1_p1.into()]).unwrap();
        design.connect_out(r1_p2, &[c1_p1.into()]).unwrap();

        DesignReport::from_design(&design.finalize().unwrap())
    }

    #[test]
    fn test_report_contents() {
        let report = report();
        assert_eq!(report.title, "Filter");
        assert_eq!(report.components[0].designator, "R1");
        assert_eq!(report.components[1].designator, "C1");
        assert_eq!(report.components[1].value, "1uF");

        let mid = &report.nets[2];
        assert_eq!(mid.name, "ANON_NET_R1_P2");
        assert_eq!(mid.pins, vec!["R1.P2", "C1.P1"]);
        assert_eq!(mid.groups[0][0].direction, ConnectDirection::In);
        assert_eq!(mid.groups[0][1].direction, ConnectDirection::Out);
        assert!(report.nets[0].is_power);
        assert!(report.nets[1].is_ground);
    }

    #[test]
    fn test_json() {
        let report = report();
        let mut buffer = Vec::new();
        write_json(&report, &mut buffer).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(value["title"], "Filter");
        assert_eq!(value["nets"][0]["name"], "VCC");
        assert_eq!(value["nets"][0]["is_power"], true);
        assert_eq!(value["nets"][2]["groups"][0][1]["direction"], "out");

        let parsed: DesignReport = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_csv_rows() {
        let mut buffer = Vec::new();
        write_csv(&report(), &mut buffer).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "designator,pin,numbers,net");
        assert_eq!(lines[1], "R1,P1,1,VCC");
        assert_eq!(lines[2], "R1,P2,2,ANON_NET_R1_P2");
        assert_eq!(lines[4], "C1,P2,2,GND");
    }

    #[test]
    fn test_plain_text() {
        let mut buffer = Vec::new();
        write_text(&report(), &mut buffer, false).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("=== Filter ==="));
        assert!(text.contains("C1"));
        assert!(text.contains("DNS"));
        assert!(text.contains("GND: C1.P2"));
        assert!(!text.contains('\u{1b}'));
    }
}
