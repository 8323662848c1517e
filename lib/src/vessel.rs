//! Host-side description of a vessel, read once per simulation run.
//!
//! This is what an editor or flight context hands over: an ordered list of
//! parts with their modules, resources and attach topology. Nothing in here
//! is mutated by the simulation.

use color_eyre::eyre;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{math::H1, resources::ResourceId};

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[repr(transparent)]
pub struct PartId(pub u32);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    #[default]
    Stack,
    Surface,
    Dock,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachNode {
    pub id: String,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub attached: Option<PartId>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartResource {
    pub id: ResourceId,
    pub amount: f64,
    pub max_amount: f64,
    #[serde(default = "yes")]
    pub flow_enabled: bool,
}

/// A propellant used in an engine
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Propellant {
    pub resource: ResourceId,
    /// Volumetric mix ratio of this propellant
    pub ratio: f64,
    /// Left out of the mass flow split; still drawn at its mix ratio.
    #[serde(default)]
    pub ignore_for_isp: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Maximum thrust (kN)
    pub max_thrust: f64,
    /// Minimum thrust (kN)
    #[serde(default)]
    pub min_thrust: f64,
    /// Thrust limiter, in percent
    #[serde(default = "hundred")]
    pub thrust_percentage: f64,
    /// Isp (s) as a function of static pressure (atm)
    pub atmosphere_curve: H1,
    pub propellants: Vec<Propellant>,
    #[serde(default)]
    pub throttle_locked: bool,
    /// Is the module enabled? Disabled engines never fire.
    #[serde(default = "yes")]
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PartModule {
    Engines(EngineParams),
    EnginesFx {
        engine_id: String,
        params: EngineParams,
    },
    /// Switches between two `EnginesFx` modules on the same part.
    MultiModeEngine {
        primary: String,
        secondary: String,
        running_primary: bool,
    },
    Decoupler {
        #[serde(default)]
        is_omni_decoupler: bool,
    },
    AnchoredDecoupler,
    DockingNode {
        #[serde(default)]
        staging_enabled: bool,
    },
    LaunchClamp,
    FuelLine {
        target: Option<PartId>,
    },
    FuelTank,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<PartId>,
    pub inverse_stage: i32,
    /// Dry mass (tons)
    pub mass: f64,
    /// Dry cost (funds)
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub resources: Vec<PartResource>,
    #[serde(default)]
    pub modules: Vec<PartModule>,
    #[serde(default)]
    pub attach_nodes: Vec<AttachNode>,
    #[serde(default = "yes")]
    pub fuel_crossfeed: bool,
    /// Attach nodes whose id contains this key do not pass fuel.
    #[serde(default)]
    pub no_crossfeed_node_key: String,
    #[serde(default = "yes")]
    pub physically_significant: bool,
    #[serde(default)]
    pub activates_even_if_disconnected: bool,
    /// Local static pressure (atm). Only read in flight.
    #[serde(default)]
    pub static_pressure: f64,
}

fn yes() -> bool {
    true
}

fn hundred() -> f64 {
    100.0
}

impl Part {
    pub fn new(id: u32, name: &str, inverse_stage: i32, mass: f64) -> Self {
        Self {
            id: PartId(id),
            name: name.into(),
            parent: None,
            inverse_stage,
            mass,
            cost: 0.0,
            resources: vec![],
            modules: vec![],
            attach_nodes: vec![],
            fuel_crossfeed: true,
            no_crossfeed_node_key: String::new(),
            physically_significant: true,
            activates_even_if_disconnected: false,
            static_pressure: 0.0,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: PartId) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_resource(mut self, id: ResourceId, amount: f64) -> Self {
        self.resources.push(PartResource {
            id,
            amount,
            max_amount: amount,
            flow_enabled: true,
        });
        self
    }

    #[must_use]
    pub fn with_module(mut self, module: PartModule) -> Self {
        self.modules.push(module);
        self
    }

    #[must_use]
    pub fn with_node(mut self, id: &str, node_type: NodeType, attached: Option<PartId>) -> Self {
        self.attach_nodes.push(AttachNode {
            id: id.into(),
            node_type,
            attached,
        });
        self
    }

    #[must_use]
    pub fn with_crossfeed(mut self, fuel_crossfeed: bool) -> Self {
        self.fuel_crossfeed = fuel_crossfeed;
        self
    }

    pub fn is_engine(&self) -> bool {
        self.modules.iter().any(|m| {
            matches!(
                m,
                PartModule::Engines(_) | PartModule::EnginesFx { .. }
            )
        })
    }

    pub fn is_launch_clamp(&self) -> bool {
        self.modules
            .iter()
            .any(|m| matches!(m, PartModule::LaunchClamp))
    }

    /// Does firing this part's stage separate it (and its subtree) from the
    /// vessel?
    pub fn is_decoupler_type(&self) -> bool {
        self.modules.iter().any(|m| match m {
            PartModule::Decoupler { .. } | PartModule::AnchoredDecoupler | PartModule::LaunchClamp => {
                true
            }
            PartModule::DockingNode { staging_enabled } => *staging_enabled,
            _ => false,
        })
    }

    pub fn fuel_line_target(&self) -> Option<PartId> {
        self.modules.iter().find_map(|m| match m {
            PartModule::FuelLine { target } => *target,
            _ => None,
        })
    }
}

/// Where the snapshot was taken.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum VesselContext {
    /// Assembly in the editor; nothing is flying yet.
    #[default]
    Editor,
    /// A live vessel. `throttle` is the main throttle in `0..=1`.
    Flight { throttle: f64, current_stage: i32 },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VesselSnapshot {
    pub parts: Vec<Part>,
    #[serde(default)]
    pub context: VesselContext,
}

impl VesselSnapshot {
    pub fn new(parts: Vec<Part>) -> Self {
        Self {
            parts,
            context: VesselContext::Editor,
        }
    }

    pub fn is_flying(&self) -> bool {
        matches!(self.context, VesselContext::Flight { .. })
    }

    /// The highest activation stage present on the vessel.
    pub fn last_stage(&self) -> i32 {
        self.parts
            .iter()
            .map(|p| p.inverse_stage)
            .max()
            .unwrap_or_default()
            .max(0)
    }
}

/// Supplies the live part list to the scheduler.
pub trait VesselSource {
    /// Is there an assembly or active vessel to simulate right now?
    fn has_vessel(&self) -> bool;

    /// Copies the current part list. Called on the polling thread.
    fn snapshot(&self) -> eyre::Result<VesselSnapshot>;
}

impl VesselSource for VesselSnapshot {
    fn has_vessel(&self) -> bool {
        !self.parts.is_empty()
    }

    fn snapshot(&self) -> eyre::Result<VesselSnapshot> {
        Ok(self.clone())
    }
}

impl VesselSource for RwLock<Option<VesselSnapshot>> {
    fn has_vessel(&self) -> bool {
        self.read().as_ref().is_some_and(|v| !v.parts.is_empty())
    }

    fn snapshot(&self) -> eyre::Result<VesselSnapshot> {
        use color_eyre::eyre::OptionExt;
        self.read().clone().ok_or_eyre("No vessel loaded.")
    }
}
