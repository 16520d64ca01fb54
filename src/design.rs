use log::{debug, info};
use std::collections::HashMap;

use crate::archetype::{ArchetypeRegistry, PinSelector};
use crate::component::{
    default_value_and_part_number, ComponentId, ComponentInstance, ComponentSpec, Designator,
    InstancePin, PinRef,
};
use crate::config::EngineConfig;
use crate::error::{DesignError, Result};
use crate::net::{ConnectDirection, Endpoint, Net, NetClassifier, NetId, PinRole};
use crate::provenance::{self, Provenance, SourceCache};
use crate::refdes::{self, AnchorRecord, RefdesHistory};

/// What a connect statement attaches its endpoints to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget {
    Net(NetId),
    /// The pin's net, created on demand
    Pin(PinRef),
}

impl From<NetId> for ConnectTarget {
    fn from(net: NetId) -> Self {
        ConnectTarget::Net(net)
    }
}

impl From<PinRef> for ConnectTarget {
    fn from(pin: PinRef) -> Self {
        ConnectTarget::Pin(pin)
    }
}

/// Everything created while one design trace runs.
///
/// Components and nets keep their creation order; designator assignment and
/// every export depend on it.
#[derive(Debug)]
pub struct DesignContext {
    pub(crate) title: String,
    pub(crate) registry: ArchetypeRegistry,
    pub(crate) config: EngineConfig,
    pub(crate) components: Vec<ComponentInstance>,
    pub(crate) nets: Vec<Net>,
    pub(crate) named_nets: HashMap<String, NetId>,
    pub(crate) designators: HashMap<String, ComponentId>,
    pub(crate) sources: SourceCache,
}

/// Handle returned by connect calls; further endpoints join the same group.
pub struct Connection<'a> {
    design: &'a mut DesignContext,
    net: NetId,
    group: usize,
}

impl<'a> Connection<'a> {
    pub fn net(&self) -> NetId {
        self.net
    }

    pub fn group(&self) -> usize {
        self.group
    }

    pub fn connect(self, endpoints: &[Endpoint], direction: ConnectDirection, role: PinRole) -> Result<Self> {
        self.design
            .attach(self.net, self.group, endpoints, direction, role)?;
        Ok(self)
    }

    pub fn connect_in(self, endpoints: &[Endpoint]) -> Result<Self> {
        self.connect(endpoints, ConnectDirection::In, PinRole::Primary)
    }

    pub fn connect_out(self, endpoints: &[Endpoint]) -> Result<Self> {
        self.connect(endpoints, ConnectDirection::Out, PinRole::Primary)
    }
}

impl DesignContext {
    pub fn new(title: impl Into<String>, registry: ArchetypeRegistry, config: EngineConfig) -> Self {
        DesignContext {
            title: title.into(),
            registry,
            config,
            components: Vec::new(),
            nets: Vec::new(),
            named_nets: HashMap::new(),
            designators: HashMap::new(),
            sources: SourceCache::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn registry(&self) -> &ArchetypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ArchetypeRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sources_mut(&mut self) -> &mut SourceCache {
        &mut self.sources
    }

    /// Place a component of a registered archetype
    pub fn create_component(&mut self, spec: ComponentSpec) -> Result<ComponentId> {
        let resolved = self.registry.resolved_pins(spec.archetype)?;
        let archetype = self.registry.get(spec.archetype);
        let id = ComponentId(self.components.len());

        let designator = match spec.designator {
            Some(designator) => {
                let designator = designator.to_uppercase();
                if self.designators.contains_key(&designator) {
                    return Err(DesignError::DuplicateDesignator {
                        designator,
                        provenance: provenance::label(&spec.provenance),
                    });
                }
                Designator::Explicit(designator)
            }
            None => Designator::Pending,
        };

        let part_number = spec
            .part_number
            .or_else(|| archetype.default_part_number.clone());
        let (value, part_number) =
            default_value_and_part_number(spec.value, part_number, archetype.value_suffix.as_deref());

        let component = ComponentInstance {
            id,
            archetype: spec.archetype,
            type_name: archetype.name.clone(),
            prefix: archetype.prefix.clone(),
            designator,
            value,
            part_number,
            populated: spec.populated,
            reversed: spec.reversed,
            selector: archetype.selector.clone(),
            pins: resolved
                .iter()
                .map(|canonical| InstancePin {
                    owner: id,
                    canonical: canonical.clone(),
                    net: None,
                })
                .collect(),
            provenance: spec.provenance,
        };

        debug!("Created component {} of type {}", component, component.type_name);
        if let Some(designator) = component.designator() {
            self.designators.insert(designator.to_string(), id);
        }
        let role = match component.selector {
            PinSelector::TwoTerminal => PinRole::Secondary,
            _ => PinRole::Primary,
        };
        self.components.push(component);

        if let Some(net) = spec.to {
            self.connect_group(net, &[Endpoint::Component(id)], ConnectDirection::Out, role)?;
        }

        Ok(id)
    }

    /// Create a net; `None` makes an anonymous one, named during finalization
    pub fn create_net(&mut self, name: Option<&str>, provenance: Option<Provenance>) -> Result<NetId> {
        let id = NetId(self.nets.len());
        let net = Net::new(id, name, provenance);

        if let Some(name) = net.name() {
            if self.named_nets.contains_key(name) {
                return Err(DesignError::DuplicateNetName {
                    name: name.to_string(),
                    provenance: provenance::label(&net.provenance),
                });
            }
            self.named_nets.insert(name.to_string(), id);
        }

        debug!("Created net {}", net.label());
        self.nets.push(net);
        Ok(id)
    }

    /// Connect endpoints as one new connection group
    pub fn connect_group(
        &mut self,
        target: impl Into<ConnectTarget>,
        endpoints: &[Endpoint],
        direction: ConnectDirection,
        role: PinRole,
    ) -> Result<Connection<'_>> {
        let (net, group) = match target.into() {
            ConnectTarget::Net(net) => (net, self.nets[net.0].open_group()),
            ConnectTarget::Pin(pin) => match self.net_of(pin) {
                Some(net) => (net, self.nets[net.0].open_group()),
                None => {
                    let net = self.create_net(None, None)?;
                    let group = self.nets[net.0].open_group();
                    self.bind(pin, net, group, direction.opposite())?;
                    (net, group)
                }
            },
        };

        self.attach(net, group, endpoints, direction, role)?;
        Ok(Connection {
            design: self,
            net,
            group,
        })
    }

    /// Endpoints flow into the target
    pub fn connect_in(&mut self, target: impl Into<ConnectTarget>, endpoints: &[Endpoint]) -> Result<Connection<'_>> {
        self.connect_group(target, endpoints, ConnectDirection::In, PinRole::Primary)
    }

    /// Endpoints are driven by the target
    pub fn connect_out(&mut self, target: impl Into<ConnectTarget>, endpoints: &[Endpoint]) -> Result<Connection<'_>> {
        self.connect_group(target, endpoints, ConnectDirection::Out, PinRole::Primary)
    }

    fn attach(
        &mut self,
        net: NetId,
        group: usize,
        endpoints: &[Endpoint],
        direction: ConnectDirection,
        role: PinRole,
    ) -> Result<()> {
        for endpoint in endpoints {
            let pin = match *endpoint {
                Endpoint::Pin(pin) => pin,
                Endpoint::Component(component) => self.pin_to_connect(component, net, role)?,
                Endpoint::Net(other) => {
                    let target = &self.nets[net.0];
                    return Err(DesignError::MalformedConnection {
                        target: target.label(),
                        reason: format!(
                            "can't connect net {} to another net, connect pins instead",
                            self.nets[other.0].label()
                        ),
                        provenance: provenance::label(&target.provenance),
                    });
                }
            };
            self.bind(pin, net, group, direction)?;
        }
        Ok(())
    }

    fn pin_to_connect(&self, component: ComponentId, net: NetId, role: PinRole) -> Result<PinRef> {
        let part = &self.components[component.0];
        let pins = self.registry.resolved_pins(part.archetype)?;
        let net = &self.nets[net.0];

        part.selector
            .pin_to_connect(&pins, role, net.name(), part.reversed)
            .map(|index| part.pin_ref(index))
            .map_err(|reason| DesignError::UnresolvableEndpoint {
                component: part.label(),
                net: net.label(),
                reason,
                provenance: provenance::label(&part.provenance),
            })
    }

    fn bind(&mut self, pin: PinRef, net: NetId, group: usize, direction: ConnectDirection) -> Result<()> {
        if let Some(existing) = self.instance_pin(pin).net {
            let part = &self.components[pin.component.0];
            return Err(DesignError::DoubleBinding {
                pin: part.pin_label(pin.index),
                existing: self.nets[existing.0].label(),
                requested: self.nets[net.0].label(),
                provenance: provenance::label(&part.provenance),
            });
        }

        self.components[pin.component.0].pins[pin.index].net = Some(net);
        self.nets[net.0].group_mut(group).push(pin, direction);
        Ok(())
    }

    /// Net of a pin, allocating an anonymous net for unconnected pins.
    ///
    /// Repeated calls return the same net.
    pub fn pin_net(&mut self, pin: PinRef) -> Result<NetId> {
        if let Some(net) = self.net_of(pin) {
            return Ok(net);
        }
        let net = self.create_net(None, None)?;
        let group = self.nets[net.0].open_group();
        self.bind(pin, net, group, ConnectDirection::Unknown)?;
        debug!(
            "Pin {} got implicit net #{}",
            self.components[pin.component.0].pin_label(pin.index),
            net.0
        );
        Ok(net)
    }

    /// Net of a pin without creating one
    pub fn net_of(&self, pin: PinRef) -> Option<NetId> {
        self.instance_pin(pin).net
    }

    pub fn pin(&self, component: ComponentId, name: &str) -> Result<PinRef> {
        let part = &self.components[component.0];
        part.pin_index(name)
            .map(|index| part.pin_ref(index))
            .ok_or_else(|| DesignError::UnknownPin {
                component: part.label(),
                pin: name.to_string(),
            })
    }

    pub fn pin_at(&self, component: ComponentId, index: usize) -> Result<PinRef> {
        let part = &self.components[component.0];
        if index < part.pins.len() {
            Ok(part.pin_ref(index))
        } else {
            Err(DesignError::UnknownPin {
                component: part.label(),
                pin: format!("#{}", index),
            })
        }
    }

    pub fn instance_pin(&self, pin: PinRef) -> &InstancePin {
        &self.components[pin.component.0].pins[pin.index]
    }

    pub fn components(&self) -> &[ComponentInstance] {
        &self.components
    }

    pub fn component(&self, id: ComponentId) -> &ComponentInstance {
        &self.components[id.0]
    }

    pub fn nets(&self) -> &[Net] {
        &self.nets
    }

    pub fn net(&self, id: NetId) -> &Net {
        &self.nets[id.0]
    }

    pub fn net_by_name(&self, name: &str) -> Option<NetId> {
        self.named_nets.get(&name.to_uppercase()).copied()
    }

    /// Only explicit designators are known before finalization
    pub fn component_by_designator(&self, designator: &str) -> Option<ComponentId> {
        self.designators.get(&designator.to_uppercase()).copied()
    }

    /// Assign designators, name anonymous nets and rewrite the designator history.
    pub fn finalize(mut self) -> Result<FinalizedDesign> {
        info!(
            "Finalizing {}: {} components, {} nets",
            if self.title.is_empty() { "design" } else { self.title.as_str() },
            self.components.len(),
            self.nets.len()
        );

        let history_file = self.config.history_file.clone();
        let mut history = RefdesHistory::load(history_file.as_deref())?;
        let records = refdes::assign_designators(&mut self, &mut history)?;
        refdes::name_anonymous_nets(&mut self)?;

        if let Some(path) = &history_file {
            RefdesHistory::write(path, &records)?;
        }

        let designators = self
            .components
            .iter()
            .filter_map(|c| c.designator().map(|d| (d.to_string(), c.id)))
            .collect();

        Ok(FinalizedDesign {
            title: self.title,
            classifier: self.config.classifier(),
            components: self.components,
            nets: self.nets,
            named_nets: self.named_nets,
            designators,
            anchors: records,
        })
    }
}

/// Read-only view of a design after finalization.
#[derive(Debug)]
pub struct FinalizedDesign {
    title: String,
    classifier: NetClassifier,
    components: Vec<ComponentInstance>,
    nets: Vec<Net>,
    named_nets: HashMap<String, NetId>,
    designators: HashMap<String, ComponentId>,
    anchors: Vec<AnchorRecord>,
}

impl FinalizedDesign {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn components(&self) -> &[ComponentInstance] {
        &self.components
    }

    pub fn component(&self, id: ComponentId) -> &ComponentInstance {
        &self.components[id.0]
    }

    pub fn component_by_designator(&self, designator: &str) -> Option<&ComponentInstance> {
        self.designators
            .get(&designator.to_uppercase())
            .map(|id| &self.components[id.0])
    }

    pub fn nets(&self) -> &[Net] {
        &self.nets
    }

    pub fn net(&self, id: NetId) -> &Net {
        &self.nets[id.0]
    }

    pub fn net_by_name(&self, name: &str) -> Option<&Net> {
        self.named_nets
            .get(&name.to_uppercase())
            .map(|id| &self.nets[id.0])
    }

    /// Every net is named once finalized
    pub fn net_name(&self, id: NetId) -> &str {
        self.nets[id.0].name().unwrap_or_default()
    }

    /// Look a pin up by designator and any of its names
    pub fn find_pin(&self, designator: &str, pin: &str) -> Option<&InstancePin> {
        self.component_by_designator(designator)
            .and_then(|part| part.pin_by_name(pin))
    }

    pub fn instance_pin(&self, pin: PinRef) -> &InstancePin {
        &self.components[pin.component.0].pins[pin.index]
    }

    pub fn pin_label(&self, pin: PinRef) -> String {
        self.components[pin.component.0].pin_label(pin.index)
    }

    pub fn is_power(&self, net: NetId) -> bool {
        self.classifier.is_power(self.net_name(net))
    }

    pub fn is_ground(&self, net: NetId) -> bool {
        self.classifier.is_ground(self.net_name(net))
    }

    /// Anchors written to the designator history for this run
    pub fn anchors(&self) -> &[AnchorRecord] {
        &self.anchors
    }
}
