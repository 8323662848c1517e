//! Stage-by-stage fuel flow simulation over a snapshot of the vessel.
//!
//! [`Simulation::prepare`] turns a [`VesselSnapshot`] into an arena of
//! [`SimPart`]s and [`Simulation::run`] walks the activation stages from the
//! last one down to zero, draining propellant and integrating delta-v with
//! the rocket equation.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use color_eyre::eyre::{self, bail};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    arena::Arena,
    math::G0,
    part::{fuel_sources, SimPart, SourceSet},
    resources::{ResourceId, ResourceTable},
    stage::{effective_isp, thrust_to_weight, Stage},
    vessel::{Part, PartId, PartModule, VesselContext, VesselSnapshot},
};

/// Upper bound on drain steps within one stage.
pub const MAX_STEPS_PER_STAGE: usize = 1000;

/// Burn times above this are reported as zero.
pub const MAX_REPORTED_TIME: f64 = 9999.0;

/// Environment the simulation is evaluated in.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConditions {
    /// Local gravitational acceleration for thrust-to-weight (m/s^2)
    pub gravity: f64,
    /// Atmospheric pressure for Isp curves when not flying (atm)
    pub atm_pressure: f64,
}

impl Default for SimConditions {
    fn default() -> Self {
        Self {
            gravity: G0,
            atm_pressure: 0.0,
        }
    }
}

/// An engine taking part in the current drain step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct EngineRef {
    part: PartId,
    index: usize,
}

#[derive(Clone, Debug)]
pub struct Simulation {
    table: Arc<ResourceTable>,
    conditions: SimConditions,

    parts: Arena<PartId, SimPart>,
    /// Fuel line parts still attached, in snapshot order.
    fuel_lines: Vec<PartId>,

    active_engines: Vec<EngineRef>,
    drained_parts: BTreeSet<PartId>,
    drain_types: BTreeSet<ResourceId>,

    current_stage: i32,
    last_stage: i32,

    total_thrust: f64,
    actual_thrust: f64,
    isp: f64,
}

impl Simulation {
    /// Builds the per-run part graph from `snapshot`. Nothing in the snapshot
    /// is referenced afterwards.
    pub fn prepare(
        snapshot: &VesselSnapshot,
        table: Arc<ResourceTable>,
        conditions: SimConditions,
    ) -> eyre::Result<Self> {
        let by_id = validate(snapshot, &table)?;

        let throttle = match snapshot.context {
            VesselContext::Editor => None,
            VesselContext::Flight { throttle, .. } => Some(throttle),
        };

        let mut parts = Arena::new();
        let mut fuel_lines = vec![];
        for part in &snapshot.parts {
            let decoupled_in_stage = decoupled_in_stage(part, &by_id, &mut BTreeSet::new())?;
            let pressure = if snapshot.is_flying() {
                part.static_pressure
            } else {
                conditions.atm_pressure
            };
            let sim = SimPart::new(part, decoupled_in_stage, pressure, throttle, &table);
            if sim.is_fuel_line {
                fuel_lines.push(sim.id);
            }
            parts.insert(part.id, sim);
        }

        let last_stage = snapshot.last_stage();
        let current_stage = match snapshot.context {
            VesselContext::Editor => last_stage,
            VesselContext::Flight { current_stage, .. } => current_stage.clamp(0, last_stage),
        };
        debug!(
            "Simulation::prepare: {} parts, {} fuel lines, starting at stage {current_stage} of {last_stage}",
            parts.len(),
            fuel_lines.len()
        );

        Ok(Self {
            table,
            conditions,
            parts,
            fuel_lines,
            active_engines: vec![],
            drained_parts: BTreeSet::new(),
            drain_types: BTreeSet::new(),
            current_stage,
            last_stage,
            total_thrust: 0.0,
            actual_thrust: 0.0,
            isp: 0.0,
        })
    }

    pub fn last_stage(&self) -> i32 {
        self.last_stage
    }

    pub fn parts(&self) -> &Arena<PartId, SimPart> {
        &self.parts
    }

    /// Dumps the prepared part tree at debug level.
    pub fn log_parts(&self) {
        for part in self.parts.values() {
            debug!("{part}");
            for engine in &part.engines {
                debug!("  {engine}");
            }
        }
    }

    /// Simulates every stage from the starting stage down to zero. The
    /// returned vector is indexed by stage number.
    ///
    /// The snapshot is consumed by the run; prepare a new simulation to run
    /// again.
    pub fn run(&mut self) -> eyre::Result<Vec<Stage>> {
        let stage_count = usize::try_from(self.current_stage + 1).unwrap_or_default();
        let mut stages: Vec<Stage> = (0..stage_count)
            .map(|n| Stage::new(n as i32))
            .collect();

        while self.current_stage >= 0 {
            let number = self.current_stage;
            debug!("Simulation::run: START stage {number}");

            self.update_resource_drains();

            let stage_start_mass = self.ship_mass()?;
            let mut stage = Stage::new(number);
            for part in self.parts.values() {
                if part.decoupled_in_stage == number - 1 {
                    stage.cost += part.cost;
                    stage.mass += part.start_mass();
                    stage.part_count += 1;
                }
            }
            stage.total_part_count = self.parts.len();
            stage.thrust = self.total_thrust;
            stage.actual_thrust = self.actual_thrust;
            stage.thrust_to_weight =
                thrust_to_weight(self.total_thrust, stage_start_mass, self.conditions.gravity);
            stage.actual_thrust_to_weight =
                thrust_to_weight(self.actual_thrust, stage_start_mass, self.conditions.gravity);
            stage.max_thrust_to_weight = stage.thrust_to_weight;

            let mut step_start_mass = stage_start_mass;
            let mut stage_time = 0.0;
            for step in 0.. {
                if self.allowed_to_stage() {
                    trace!("Simulation::run: stage {number} allowed to stage after {step} steps");
                    break;
                }
                if step >= MAX_STEPS_PER_STAGE {
                    warn!("Simulation::run: stage {number} hit the step limit, keeping partial result");
                    break;
                }

                let dt = self.time_to_next_drain();
                if !dt.is_finite() || dt >= f64::MAX {
                    trace!("Simulation::run: nothing left to drain in stage {number}");
                    break;
                }
                trace!("Simulation::run: step {step} dt={dt}");

                for &id in &self.drained_parts {
                    if let Some(part) = self.parts.get_mut(id) {
                        part.drain_resources(dt);
                    }
                }
                stage_time += dt;

                let step_end_mass = self.ship_mass()?;
                if step_start_mass > 0.0 && step_end_mass > 0.0 && step_start_mass > step_end_mass
                {
                    stage.delta_v += self.isp * G0 * (step_start_mass / step_end_mass).ln();
                }

                stage.max_thrust_to_weight = stage.max_thrust_to_weight.max(thrust_to_weight(
                    self.total_thrust,
                    step_end_mass,
                    self.conditions.gravity,
                ));
                self.update_resource_drains();

                if step_end_mass == step_start_mass {
                    trace!("Simulation::run: mass stalled in stage {number}");
                    break;
                }
                step_start_mass = step_end_mass;
            }

            let stage_end_mass = self.ship_mass()?;
            stage.isp = effective_isp(stage.delta_v, stage_start_mass, stage_end_mass);
            stage.time = if stage_time > MAX_REPORTED_TIME {
                0.0
            } else {
                stage_time
            };
            debug!("Simulation::run: {stage}");

            if let Some(slot) = stages.get_mut(number as usize) {
                *slot = stage;
            }

            self.current_stage -= 1;
            if self.current_stage >= 0 {
                self.activate_stage();
            }
        }

        Stage::accumulate(&mut stages);
        Ok(stages)
    }

    fn ship_mass(&self) -> eyre::Result<f64> {
        let mass: f64 = self.parts.values().map(|p| p.mass(&self.table)).sum();
        if !mass.is_finite() {
            bail!("Vessel mass is not finite ({mass}) in stage {}", self.current_stage);
        }
        Ok(mass)
    }

    /// Recomputes which engines can burn and how fast each part drains.
    fn update_resource_drains(&mut self) {
        for &id in &self.drained_parts {
            if let Some(part) = self.parts.get_mut(id) {
                part.clear_resource_drains();
            }
        }
        self.drained_parts.clear();
        self.drain_types.clear();
        self.active_engines.clear();

        let candidates: Vec<EngineRef> = self
            .parts
            .iter()
            .filter(|(_, part)| part.inverse_stage >= self.current_stage)
            .flat_map(|(id, part)| {
                (0..part.engines.len()).map(move |index| EngineRef { part: id, index })
            })
            .collect();

        for engine in candidates {
            self.set_resource_drains(engine);
        }
        self.calculate_thrust_and_isp();
    }

    /// Resolves every propellant of `engine`. If all of them have a source the
    /// engine becomes active and its consumption is split evenly over the
    /// sources of each propellant.
    fn set_resource_drains(&mut self, engine: EngineRef) {
        let Some(sim) = self
            .parts
            .get(engine.part)
            .and_then(|p| p.engines.get(engine.index))
        else {
            return;
        };

        let mut sources: BTreeMap<ResourceId, SourceSet> = BTreeMap::new();
        for (res, _) in sim.resource_consumptions.iter() {
            let set = fuel_sources(engine.part, res, &self.parts, &self.fuel_lines, &self.table);
            if set.is_empty() {
                trace!(
                    "Simulation::set_resource_drains: {:?} starved of {res}",
                    engine.part
                );
                return;
            }
            sources.insert(res, set);
        }

        let consumptions: Vec<(ResourceId, f64)> = sim.resource_consumptions.iter().collect();
        for (res, consumption) in consumptions {
            let Some(set) = sources.get(&res) else {
                continue;
            };
            let share = consumption / set.len() as f64;
            for id in set.iter() {
                if let Some(part) = self.parts.get_mut(id) {
                    part.add_drain(res, share);
                    self.drained_parts.insert(id);
                }
            }
            self.drain_types.insert(res);
        }
        self.active_engines.push(engine);
    }

    fn calculate_thrust_and_isp(&mut self) {
        self.total_thrust = 0.0;
        self.actual_thrust = 0.0;
        let mut flow = 0.0;
        let mut weighted_isp = 0.0;
        for engine in &self.active_engines {
            let Some(sim) = self
                .parts
                .get(engine.part)
                .and_then(|p| p.engines.get(engine.index))
            else {
                continue;
            };
            self.total_thrust += sim.thrust;
            self.actual_thrust += sim.actual_thrust;
            flow += sim.mass_flow_rate;
            weighted_isp += sim.mass_flow_rate * sim.isp;
        }
        self.isp = if flow > 0.0 { weighted_isp / flow } else { 0.0 };
    }

    fn time_to_next_drain(&self) -> f64 {
        self.drained_parts
            .iter()
            .filter_map(|&id| self.parts.get(id))
            .map(|p| OrderedFloat(p.time_to_drain_resource()))
            .min()
            .map_or(f64::MAX, |dt| dt.0)
    }

    /// Can the current stage end?
    fn allowed_to_stage(&self) -> bool {
        if self.active_engines.is_empty() {
            return true;
        }

        for part in self.parts.values() {
            if part.decoupled_in_stage != self.current_stage - 1 {
                continue;
            }
            if part.is_sepratron && part.decoupled_in_stage < part.inverse_stage {
                continue;
            }
            if !part.resources.is_empty_of(&self.drain_types) {
                return false;
            }
            if self.active_engines.iter().any(|e| e.part == part.id) {
                return false;
            }
        }

        self.current_stage > 0
    }

    /// Drops every part that separates at or above the current stage and
    /// forgets all references to them.
    fn activate_stage(&mut self) {
        let removed: BTreeSet<PartId> = self
            .parts
            .iter()
            .filter(|(_, part)| part.decoupled_in_stage >= self.current_stage)
            .map(|(id, _)| id)
            .collect();
        if removed.is_empty() {
            return;
        }
        debug!(
            "Simulation::activate_stage: stage {} sheds {} parts",
            self.current_stage,
            removed.len()
        );

        self.parts.retain(|id, _| !removed.contains(&id));
        self.fuel_lines.retain(|id| !removed.contains(id));
        self.drained_parts.retain(|id| !removed.contains(id));
        for (_, part) in self.parts.iter_mut() {
            part.remove_attached_parts(&removed);
        }
    }
}

/// Checks the snapshot for dangling references and unknown resources, and
/// indexes it by part id.
fn validate<'a>(
    snapshot: &'a VesselSnapshot,
    table: &ResourceTable,
) -> eyre::Result<BTreeMap<PartId, &'a Part>> {
    let mut by_id = BTreeMap::new();
    for part in &snapshot.parts {
        if by_id.insert(part.id, part).is_some() {
            bail!("Duplicate part id {:?} ({})", part.id, part.name);
        }
    }

    let check_ref = |part: &Part, what: &str, target: PartId| -> eyre::Result<()> {
        if by_id.contains_key(&target) {
            Ok(())
        } else {
            bail!("{} references missing {what} {target:?}", part.name)
        }
    };
    let check_resource = |part: &Part, res: ResourceId| -> eyre::Result<()> {
        if table.contains(res) {
            Ok(())
        } else {
            bail!("{} uses unknown resource {res}", part.name)
        }
    };

    for part in &snapshot.parts {
        if let Some(parent) = part.parent {
            check_ref(part, "parent", parent)?;
        }
        for node in &part.attach_nodes {
            if let Some(attached) = node.attached {
                check_ref(part, "attached part", attached)?;
            }
        }
        if let Some(target) = part.fuel_line_target() {
            check_ref(part, "fuel line target", target)?;
        }
        for resource in &part.resources {
            check_resource(part, resource.id)?;
        }
        for module in &part.modules {
            if let PartModule::Engines(params) | PartModule::EnginesFx { params, .. } = module {
                for propellant in &params.propellants {
                    check_resource(part, propellant.resource)?;
                }
            }
        }
    }
    Ok(by_id)
}

/// The highest inverse stage of any decoupler-type part on the way from
/// `part` to the root, or -1 if the part never separates.
fn decoupled_in_stage(
    part: &Part,
    by_id: &BTreeMap<PartId, &Part>,
    visited: &mut BTreeSet<PartId>,
) -> eyre::Result<i32> {
    if !visited.insert(part.id) {
        bail!("Parent chain of {} ({:?}) forms a cycle", part.name, part.id);
    }
    let own = if part.is_decoupler_type() {
        part.inverse_stage
    } else {
        -1
    };
    let inherited = match part.parent.and_then(|id| by_id.get(&id)) {
        Some(parent) => decoupled_in_stage(parent, by_id, visited)?,
        None => -1,
    };
    Ok(own.max(inherited))
}
