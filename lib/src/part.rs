//! Per-part simulation state and fuel-source resolution.

use std::{collections::BTreeSet, fmt};

use itertools::Itertools;
use tracing::{trace, warn};

use crate::{
    arena::Arena,
    engine::SimEngine,
    resources::{FlowClass, ResourceId, ResourceLedger, ResourceTable, RESOURCE_MIN},
    vessel::{NodeType, Part, PartId, PartModule},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimAttachNode {
    pub id: String,
    pub node_type: NodeType,
    /// Cleared when the attached part is decoupled away.
    pub attached: Option<PartId>,
}

/// Snapshot of one part, built fresh for every simulation run.
#[derive(Clone, Debug)]
pub struct SimPart {
    pub id: PartId,
    pub name: String,
    /// Cleared when the parent is decoupled away.
    pub parent: Option<PartId>,

    /// Dry mass (tons), zero for parts without physical significance.
    pub base_mass: f64,
    /// Cost including carried resources (funds)
    pub cost: f64,
    pub resources: ResourceLedger,
    /// 1 where flow is enabled, 0 where it is locked.
    pub resource_flow_states: ResourceLedger,
    /// Units per second currently drawn from this part.
    pub resource_drains: ResourceLedger,
    start_mass: f64,

    pub attach_nodes: Vec<SimAttachNode>,
    pub fuel_line_target: Option<PartId>,

    pub decoupled_in_stage: i32,
    pub inverse_stage: i32,

    pub engines: Vec<SimEngine>,

    pub is_engine: bool,
    pub is_fuel_line: bool,
    pub is_fuel_tank: bool,
    pub is_decoupler: bool,
    pub is_docking_node: bool,
    pub is_launch_clamp: bool,
    pub is_solid_motor: bool,
    pub is_sepratron: bool,
    pub fuel_crossfeed: bool,
    pub no_crossfeed_node_key: String,
}

impl SimPart {
    /// Snapshots `part`. `pressure` is the static pressure engines evaluate
    /// their Isp at and `throttle` is the live main throttle when flying.
    pub fn new(
        part: &Part,
        decoupled_in_stage: i32,
        pressure: f64,
        throttle: Option<f64>,
        table: &ResourceTable,
    ) -> Self {
        let is_launch_clamp = part.is_launch_clamp();
        let base_mass = if is_launch_clamp || !part.physically_significant {
            0.0
        } else {
            part.mass
        };

        let mut cost = part.cost;
        let mut resources = ResourceLedger::new();
        let mut resource_flow_states = ResourceLedger::new();
        for resource in &part.resources {
            if resource.amount.is_nan() {
                warn!(
                    "SimPart::new: {} has a NaN amount of resource {}, discarding it",
                    part.name, resource.id
                );
                continue;
            }
            resources.add(resource.id, resource.amount);
            resource_flow_states.set(resource.id, f64::from(u8::from(resource.flow_enabled)));
            cost += resource.amount * table.unit_cost(resource.id);
        }

        let engines = SimEngine::derive_all(part, pressure, throttle, table);
        let is_engine = part.is_engine();

        let is_solid_motor = is_engine
            && part
                .modules
                .iter()
                .filter_map(|m| match m {
                    PartModule::Engines(params) | PartModule::EnginesFx { params, .. } => {
                        Some(params)
                    }
                    _ => None,
                })
                .flat_map(|params| &params.propellants)
                .filter(|p| !table.is_free(p.resource))
                .all(|p| table.flow_mode(p.resource).class() == FlowClass::SelfOnly);
        let throttle_locked = part.modules.iter().all(|m| match m {
            PartModule::Engines(params) | PartModule::EnginesFx { params, .. } => {
                params.throttle_locked
            }
            _ => true,
        });
        let is_sepratron = is_solid_motor && throttle_locked && part.activates_even_if_disconnected;

        let mut is_fuel_line = false;
        let mut is_fuel_tank = false;
        let mut is_decoupler = false;
        let mut is_docking_node = false;
        for module in &part.modules {
            match module {
                PartModule::FuelLine { .. } => is_fuel_line = true,
                PartModule::FuelTank => is_fuel_tank = true,
                PartModule::Decoupler { .. } | PartModule::AnchoredDecoupler => is_decoupler = true,
                PartModule::DockingNode { .. } => is_docking_node = true,
                _ => {}
            }
        }

        let mut this = Self {
            id: part.id,
            name: part.name.clone(),
            parent: part.parent,
            base_mass,
            cost,
            resources,
            resource_flow_states,
            resource_drains: ResourceLedger::new(),
            start_mass: 0.0,
            attach_nodes: part
                .attach_nodes
                .iter()
                .map(|node| SimAttachNode {
                    id: node.id.clone(),
                    node_type: node.node_type,
                    attached: node.attached,
                })
                .collect(),
            fuel_line_target: part.fuel_line_target(),
            decoupled_in_stage,
            inverse_stage: part.inverse_stage,
            engines,
            is_engine,
            is_fuel_line,
            is_fuel_tank,
            is_decoupler,
            is_docking_node,
            is_launch_clamp,
            is_solid_motor,
            is_sepratron,
            fuel_crossfeed: part.fuel_crossfeed,
            no_crossfeed_node_key: part.no_crossfeed_node_key.clone(),
        };
        this.start_mass = this.mass(table);
        this
    }

    pub fn mass(&self, table: &ResourceTable) -> f64 {
        self.base_mass + self.resources.mass(table)
    }

    /// Mass when the snapshot was taken.
    pub fn start_mass(&self) -> f64 {
        self.start_mass
    }

    /// Does this part hold more than a negligible amount of `res`?
    pub fn has_resource(&self, res: ResourceId) -> bool {
        self.resources.get(res) > RESOURCE_MIN
    }

    pub fn flow_enabled(&self, res: ResourceId) -> bool {
        self.resource_flow_states.get(res) != 0.0
    }

    /// Holds `res` and has not had its flow locked.
    pub fn can_supply(&self, res: ResourceId) -> bool {
        self.has_resource(res) && self.flow_enabled(res)
    }

    pub fn add_drain(&mut self, res: ResourceId, consumption: f64) {
        self.resource_drains.add(res, consumption);
    }

    pub fn clear_resource_drains(&mut self) {
        self.resource_drains.reset();
    }

    /// How long until the first drained resource in this part runs out.
    /// `f64::MAX` when nothing is being drained.
    pub fn time_to_drain_resource(&self) -> f64 {
        self.resource_drains
            .iter()
            .filter(|&(_, drain)| drain > 0.0)
            .map(|(res, drain)| self.resources.get(res) / drain)
            .fold(f64::MAX, f64::min)
    }

    pub fn drain_resources(&mut self, dt: f64) {
        for (res, drain) in self.resource_drains.iter() {
            let amount = self.resources.get(res) - drain * dt;
            self.resources.set(res, amount.max(0.0));
        }
    }

    /// Forgets every reference to a part in `removed`.
    pub fn remove_attached_parts(&mut self, removed: &BTreeSet<PartId>) {
        for node in &mut self.attach_nodes {
            if node.attached.is_some_and(|p| removed.contains(&p)) {
                node.attached = None;
            }
        }
        if self.fuel_line_target.is_some_and(|p| removed.contains(&p)) {
            self.fuel_line_target = None;
        }
        if self.parent.is_some_and(|p| removed.contains(&p)) {
            self.parent = None;
        }
    }

    /// Depth-first stack priority search for the parts that will supply `res`
    /// to this part.
    ///
    /// Precedence: fuel lines feeding this part, then crossfeeding stack
    /// neighbours, then this part's own tank, then the parent. Each step only
    /// returns when it found something. `visited` makes every part answer at
    /// most once per search, so cyclic topologies terminate.
    pub fn source_set(
        &self,
        res: ResourceId,
        parts: &Arena<PartId, SimPart>,
        fuel_lines: &[PartId],
        visited: &mut BTreeSet<PartId>,
    ) -> SourceSet {
        let mut sources = SourceSet::default();

        if !visited.insert(self.id) {
            trace!("SimPart::source_set: {} already visited", self.name);
            return sources;
        }

        for &line in fuel_lines {
            let Some(line) = parts.get(line) else {
                continue;
            };
            if line.fuel_line_target == Some(self.id) {
                sources.union(&line.source_set(res, parts, fuel_lines, visited));
            }
        }
        if !sources.is_empty() {
            trace!("SimPart::source_set: {} fed by fuel lines: {sources}", self.name);
            return sources;
        }

        if !self.fuel_crossfeed {
            return sources;
        }

        for node in &self.attach_nodes {
            if node.node_type != NodeType::Stack {
                continue;
            }
            if !self.no_crossfeed_node_key.is_empty() && node.id.contains(&self.no_crossfeed_node_key)
            {
                continue;
            }
            let Some(neighbour) = node.attached.and_then(|id| parts.get(id)) else {
                continue;
            };
            if neighbour.fuel_crossfeed || neighbour.is_fuel_tank {
                sources.union(&neighbour.source_set(res, parts, fuel_lines, visited));
            }
        }
        if !sources.is_empty() {
            trace!("SimPart::source_set: {} fed by stack neighbours: {sources}", self.name);
            return sources;
        }

        if self.resources.has_type(res) && self.flow_enabled(res) {
            if self.has_resource(res) {
                sources.insert(self.id);
            }
            return sources;
        }

        match self.parent.and_then(|id| parts.get(id)) {
            Some(parent) => parent.source_set(res, parts, fuel_lines, visited),
            None => sources,
        }
    }
}

impl fmt::Display for SimPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({:?}):", self.name, self.id)?;
        write!(f, "  Neighbors:")?;
        for node in &self.attach_nodes {
            if let Some(attached) = node.attached {
                write!(f, " {}:{:?}={:?}", node.id, node.node_type, attached)?;
            }
        }
        writeln!(f)?;
        writeln!(f, "  Resources: {}", self.resources)?;
        if let Some(target) = self.fuel_line_target {
            writeln!(f, "  FuelLineTarget: {target:?}")?;
        }
        write!(
            f,
            "  DecoupledInStage: {} InverseStage: {} BaseMass: {} Cost: {}",
            self.decoupled_in_stage, self.inverse_stage, self.base_mass, self.cost
        )
    }
}

/// Parts supplying one resource to one engine, in discovery order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceSet(Vec<PartId>);

impl SourceSet {
    pub fn single(id: PartId) -> Self {
        Self(vec![id])
    }

    pub fn insert(&mut self, id: PartId) {
        if !self.0.contains(&id) {
            self.0.push(id);
        }
    }

    pub fn union(&mut self, other: &SourceSet) {
        for &id in &other.0 {
            self.insert(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, id: PartId) -> bool {
        self.0.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = PartId> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for SourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().map(|id| id.0).join(", "))
    }
}

/// Resolves the parts that will supply `res` to an engine on `part`,
/// according to the resource's flow mode.
pub fn fuel_sources(
    part: PartId,
    res: ResourceId,
    parts: &Arena<PartId, SimPart>,
    fuel_lines: &[PartId],
    table: &ResourceTable,
) -> SourceSet {
    let Some(this) = parts.get(part) else {
        return SourceSet::default();
    };
    match table.flow_mode(res).class() {
        FlowClass::SelfOnly => {
            if this.can_supply(res) {
                SourceSet::single(part)
            } else {
                SourceSet::default()
            }
        }
        FlowClass::Vessel => {
            let mut sources = SourceSet::default();
            for (id, p) in parts.iter() {
                if p.can_supply(res) {
                    sources.insert(id);
                }
            }
            sources
        }
        FlowClass::Stack => {
            let mut visited = BTreeSet::new();
            this.source_set(res, parts, fuel_lines, &mut visited)
        }
        FlowClass::Never => SourceSet::default(),
    }
}
