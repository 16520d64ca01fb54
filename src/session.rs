use anyhow::{anyhow, Context, Result};
use log::info;
use std::fs;
use std::path::Path;

use crate::archetype::ArchetypeRegistry;
use crate::cli::OutputFormat;
use crate::config::EngineConfig;
use crate::design::{DesignContext, FinalizedDesign};
use crate::output::{self, DesignReport};
use crate::parser::TraceParser;
use crate::trace::Trace;

/// Runs traces against a fixed archetype library and engine configuration
pub struct Session {
    config: EngineConfig,
    registry: ArchetypeRegistry,
    design: Option<FinalizedDesign>,
}

impl Session {
    /// Session with the standard parts library
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, ArchetypeRegistry::with_standard_parts())
    }

    pub fn with_registry(config: EngineConfig, registry: ArchetypeRegistry) -> Self {
        Session {
            config,
            registry,
            design: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse, replay and finalize a trace file
    pub fn load_trace(&mut self, path: &Path) -> Result<&FinalizedDesign> {
        info!("Loading trace from: {}", path.display());
        self.design = None;

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace '{}'", path.display()))?;
        let trace = TraceParser::new().parse_source(&content, Some(path))?;

        self.run_trace(&trace, Some(&content))
    }

    /// Replay a parsed trace into a fresh design and finalize it.
    ///
    /// `source_text` is the trace's own text, used for code anchors without
    /// reading the file again.
    pub fn run_trace(&mut self, trace: &Trace, source_text: Option<&str>) -> Result<&FinalizedDesign> {
        self.design = None;
        let mut design = DesignContext::new(
            trace.title.clone(),
            self.registry.clone(),
            self.config.clone(),
        );
        if let (Some(path), Some(text)) = (&trace.source, source_text) {
            design.sources_mut().insert(path.clone(), text);
        }

        trace.replay(&mut design)?;
        let finalized = design.finalize()?;
        info!(
            "Finalized {}: {} components, {} nets",
            if finalized.title().is_empty() { "design" } else { finalized.title() },
            finalized.components().len(),
            finalized.nets().len()
        );

        Ok(self.design.insert(finalized))
    }

    pub fn design(&self) -> Option<&FinalizedDesign> {
        self.design.as_ref()
    }

    pub fn report(&self) -> Result<DesignReport> {
        let design = self
            .design
            .as_ref()
            .ok_or_else(|| anyhow!("No design loaded"))?;
        Ok(DesignReport::from_design(design))
    }

    pub fn export_results(&self, path: &Path, format: OutputFormat) -> Result<()> {
        let report = self.report()?;

        match format {
            OutputFormat::Csv => output::export_csv(&report, path),
            OutputFormat::Json => output::export_json(&report, path),
            OutputFormat::Text => output::export_text(&report, path),
        }
    }

    pub fn print_summary(&self) {
        match self.report() {
            Ok(report) => output::print_summary(&report),
            Err(_) => println!("No design loaded"),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
