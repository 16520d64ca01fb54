use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::archetype::{ArchetypeBuilder, ArchetypeRegistry, PinSelector};
use crate::component::{ComponentId, ComponentSpec};
use crate::design::{ConnectTarget, DesignContext};
use crate::net::{ConnectDirection, Endpoint, NetId, PinRole};
use crate::pin::{PinSpec, PinType};
use crate::provenance::Provenance;

/// Pin fragment declared for a trace archetype
#[derive(Debug, Clone, PartialEq)]
pub struct PinDecl {
    pub names: Vec<String>,
    pub numbers: Vec<String>,
    pub pin_type: Option<PinType>,
    pub well: Option<String>,
}

impl PinDecl {
    pub fn spec(&self) -> PinSpec {
        let mut spec = PinSpec::new(&self.names).numbers(self.numbers.iter().cloned());
        if let Some(pin_type) = self.pin_type {
            spec = spec.pin_type(pin_type);
        }
        if let Some(well) = &self.well {
            spec = spec.well(well);
        }
        spec
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchetypeDecl {
    pub name: String,
    pub extends: Option<String>,
    pub prefix: Option<String>,
    pub selector: Option<PinSelector>,
    pub value_suffix: Option<String>,
    pub part_number: Option<String>,
    pub pins: Vec<PinDecl>,
    pub line: usize,
}

impl ArchetypeDecl {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        ArchetypeDecl {
            name: name.into(),
            extends: None,
            prefix: None,
            selector: None,
            value_suffix: None,
            part_number: None,
            pins: Vec::new(),
            line,
        }
    }

    fn builder(&self, registry: &ArchetypeRegistry) -> Result<ArchetypeBuilder> {
        let mut builder = ArchetypeBuilder::new(self.name.as_str());
        if let Some(parent) = &self.extends {
            builder = builder.extends(registry.lookup(parent)?);
        }
        if let Some(prefix) = &self.prefix {
            builder = builder.prefix(prefix);
        }
        if let Some(selector) = &self.selector {
            builder = builder.selector(selector.clone());
        }
        if let Some(suffix) = &self.value_suffix {
            builder = builder.value_suffix(suffix.as_str());
        }
        if let Some(part_number) = &self.part_number {
            builder = builder.default_part_number(part_number.as_str());
        }
        Ok(builder.pins(self.pins.iter().map(PinDecl::spec)))
    }
}

/// `VAR.PIN` or a bare component variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointRef {
    Pin { var: String, pin: String },
    Component(String),
    Net(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    /// Net name, or a `$handle` of an anonymous net
    Net(String),
    Pin { var: String, pin: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDecl {
    pub var: String,
    pub archetype: String,
    pub designator: Option<String>,
    pub value: Option<String>,
    pub part_number: Option<String>,
    pub populated: bool,
    pub reversed: bool,
    pub to: Option<String>,
}

/// One authoring operation, in trace order
#[derive(Debug, Clone, PartialEq)]
pub enum TraceOp {
    CreateComponent(PartDecl),
    CreateNet {
        name: String,
    },
    /// Every segment joins the same connection group
    Connect {
        target: TargetRef,
        segments: Vec<(ConnectDirection, Vec<EndpointRef>)>,
        role: PinRole,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceStatement {
    pub op: TraceOp,
    pub line: usize,
    pub provenance: Provenance,
}

/// A parsed authoring trace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    pub title: String,
    pub source: Option<PathBuf>,
    pub archetypes: Vec<ArchetypeDecl>,
    pub statements: Vec<TraceStatement>,
}

impl Trace {
    fn location(&self, line: usize) -> String {
        match &self.source {
            Some(path) => format!("{}:{}", path.display(), line),
            None => format!("line {}", line),
        }
    }

    /// Register trace archetypes, then run every statement against `design`
    pub fn replay(&self, design: &mut DesignContext) -> Result<()> {
        for decl in &self.archetypes {
            let builder = decl
                .builder(design.registry())
                .with_context(|| format!("archetype {} at {}", decl.name, self.location(decl.line)))?;
            design
                .registry_mut()
                .register(builder)
                .with_context(|| format!("archetype {} at {}", decl.name, self.location(decl.line)))?;
        }

        let mut replay = Replay::new(design);
        for statement in &self.statements {
            replay
                .run(statement)
                .with_context(|| format!("statement at {}", self.location(statement.line)))?;
        }

        info!(
            "Replayed {} statements: {} components, {} nets",
            self.statements.len(),
            design.components().len(),
            design.nets().len()
        );
        Ok(())
    }
}

/// Variable bindings while a trace runs
struct Replay<'a> {
    design: &'a mut DesignContext,
    parts: HashMap<String, ComponentId>,
    handles: HashMap<String, NetId>,
}

impl<'a> Replay<'a> {
    fn new(design: &'a mut DesignContext) -> Self {
        Replay {
            design,
            parts: HashMap::new(),
            handles: HashMap::new(),
        }
    }

    fn run(&mut self, statement: &TraceStatement) -> Result<()> {
        match &statement.op {
            TraceOp::CreateComponent(part) => self.create_component(part, &statement.provenance),
            TraceOp::CreateNet { name } => self.create_net(name, &statement.provenance),
            TraceOp::Connect {
                target,
                segments,
                role,
            } => self.connect(target, segments, *role),
        }
    }

    fn create_component(&mut self, part: &PartDecl, provenance: &Provenance) -> Result<()> {
        if self.parts.contains_key(&part.var) {
            bail!("variable {} is already bound to a component", part.var);
        }

        let archetype = self.design.registry().lookup(&part.archetype)?;
        let mut spec = ComponentSpec::new(archetype).provenance(provenance.clone());
        if let Some(designator) = &part.designator {
            spec = spec.designator(designator.as_str());
        }
        if let Some(value) = &part.value {
            spec = spec.value(value.as_str());
        }
        if let Some(part_number) = &part.part_number {
            spec = spec.part_number(part_number.as_str());
        }
        if !part.populated {
            spec = spec.not_populated();
        }
        if part.reversed {
            spec = spec.reversed();
        }
        if let Some(net) = &part.to {
            spec = spec.to(self.net(net)?);
        }

        let id = self.design.create_component(spec)?;
        self.parts.insert(part.var.clone(), id);
        Ok(())
    }

    fn create_net(&mut self, name: &str, provenance: &Provenance) -> Result<()> {
        match name.strip_prefix('$') {
            Some(handle) => {
                if self.handles.contains_key(handle) {
                    bail!("net handle ${} is already defined", handle);
                }
                let id = self.design.create_net(None, Some(provenance.clone()))?;
                self.handles.insert(handle.to_string(), id);
            }
            None => {
                self.design.create_net(Some(name), Some(provenance.clone()))?;
            }
        }
        Ok(())
    }

    fn connect(
        &mut self,
        target: &TargetRef,
        segments: &[(ConnectDirection, Vec<EndpointRef>)],
        role: PinRole,
    ) -> Result<()> {
        let target: ConnectTarget = match target {
            TargetRef::Net(name) => self.net(name)?.into(),
            TargetRef::Pin { var, pin } => self.design.pin(self.part(var)?, pin)?.into(),
        };

        // Resolve everything first; the connection handle borrows the design
        let mut resolved = Vec::with_capacity(segments.len());
        for (direction, endpoints) in segments {
            let endpoints = endpoints
                .iter()
                .map(|endpoint| self.endpoint(endpoint))
                .collect::<Result<Vec<_>>>()?;
            resolved.push((*direction, endpoints));
        }

        let mut segments = resolved.into_iter();
        let (direction, endpoints) = segments
            .next()
            .ok_or_else(|| anyhow!("connect statement without endpoints"))?;
        let mut connection = self.design.connect_group(target, &endpoints, direction, role)?;
        for (direction, endpoints) in segments {
            connection = connection.connect(&endpoints, direction, role)?;
        }
        debug!(
            "Connected group {} of net #{}",
            connection.group(),
            connection.net().index()
        );
        Ok(())
    }

    fn endpoint(&self, endpoint: &EndpointRef) -> Result<Endpoint> {
        Ok(match endpoint {
            EndpointRef::Pin { var, pin } => self.design.pin(self.part(var)?, pin)?.into(),
            EndpointRef::Component(var) => self.part(var)?.into(),
            EndpointRef::Net(name) => self.net(name)?.into(),
        })
    }

    fn part(&self, var: &str) -> Result<ComponentId> {
        self.parts
            .get(var)
            .copied()
            .ok_or_else(|| anyhow!("unknown component variable {}", var))
    }

    fn net(&self, name: &str) -> Result<NetId> {
        match name.strip_prefix('$') {
            Some(handle) => self
                .handles
                .get(handle)
                .copied()
                .ok_or_else(|| anyhow!("unknown net handle ${}", handle)),
            None => self
                .design
                .net_by_name(name)
                .ok_or_else(|| anyhow!("unknown net {}", name)),
        }
    }
}
