//! Resource types, the resource definition table and per-part resource
//! ledgers.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};

/// Amounts at or below this are treated as empty, to absorb floating point
/// residue left behind by draining.
pub const RESOURCE_MIN: f64 = 0.0001;

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[repr(transparent)]
pub struct ResourceId(pub i32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a resource is allowed to be drawn from.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, FromPrimitive, IntoPrimitive,
)]
#[repr(i32)]
pub enum FlowMode {
    NoFlow = 0,
    AllVessel = 1,
    StagePriorityFlow = 2,
    StackPrioritySearch = 3,
    AllVesselBalance = 4,
    StagePriorityFlowBalance = 5,
    StageStackFlow = 6,
    StageStackFlowBalance = 7,
    #[default]
    Null = 8,
}

/// How the fuel-source resolver treats a flow mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FlowClass {
    /// Only the requesting part itself.
    SelfOnly,
    /// Any part in the vessel.
    Vessel,
    /// Depth-first crossfeed search from the requesting part.
    Stack,
    /// Cannot be drawn at all.
    Never,
}

impl FlowMode {
    pub fn class(self) -> FlowClass {
        use FlowMode::*;
        match self {
            NoFlow => FlowClass::SelfOnly,
            AllVessel | AllVesselBalance | StagePriorityFlow | StagePriorityFlowBalance => {
                FlowClass::Vessel
            }
            StackPrioritySearch | StageStackFlow | StageStackFlowBalance => FlowClass::Stack,
            Null => FlowClass::Never,
        }
    }
}

/// One entry of the resource definition table.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(from = "RawResourceDefinition")]
pub struct ResourceDefinition {
    /// The name of the resource
    pub name: Arc<str>,
    /// Density of the resource, in tons per unit.
    pub density: f64,
    /// Where is this resource allowed to come from?
    pub flow_mode: FlowMode,
    /// Funds per unit.
    #[serde(default)]
    pub unit_cost: f64,
    /// Does consumption of this resource affect part mass? Free resources
    /// (electric charge, intake air) are assumed to be always available and
    /// never gate an engine. Defaults to massless when not given.
    pub free: bool,
}

impl ResourceDefinition {
    pub fn new(name: &str, density: f64, flow_mode: FlowMode, unit_cost: f64) -> Self {
        Self {
            name: name.into(),
            density,
            flow_mode,
            unit_cost,
            free: is_massless(density),
        }
    }
}

fn is_massless(density: f64) -> bool {
    density <= f64::from(f32::EPSILON)
}

#[derive(Deserialize)]
struct RawResourceDefinition {
    name: Arc<str>,
    density: f64,
    flow_mode: FlowMode,
    #[serde(default)]
    unit_cost: f64,
    free: Option<bool>,
}

impl From<RawResourceDefinition> for ResourceDefinition {
    fn from(raw: RawResourceDefinition) -> Self {
        Self {
            free: raw.free.unwrap_or_else(|| is_massless(raw.density)),
            name: raw.name,
            density: raw.density,
            flow_mode: raw.flow_mode,
            unit_cost: raw.unit_cost,
        }
    }
}

/// Read-only lookup from resource id to its definition.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ResourceTable {
    pub definitions: HashMap<ResourceId, ResourceDefinition>,
}

pub mod stock {
    //! Ids of the stock resources in [`ResourceTable::stock`](super::ResourceTable::stock).
    use super::ResourceId;

    pub const LIQUID_FUEL: ResourceId = ResourceId(1);
    pub const OXIDIZER: ResourceId = ResourceId(2);
    pub const SOLID_FUEL: ResourceId = ResourceId(3);
    pub const MONOPROPELLANT: ResourceId = ResourceId(4);
    pub const XENON_GAS: ResourceId = ResourceId(5);
    pub const ELECTRIC_CHARGE: ResourceId = ResourceId(6);
    pub const INTAKE_AIR: ResourceId = ResourceId(7);
    pub const ORE: ResourceId = ResourceId(8);
    pub const ABLATOR: ResourceId = ResourceId(9);
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock resource set.
    pub fn stock() -> Self {
        use FlowMode::*;
        let mut table = Self::new();
        table.insert(
            stock::LIQUID_FUEL,
            ResourceDefinition::new("LiquidFuel", 0.005, StackPrioritySearch, 0.8),
        );
        table.insert(
            stock::OXIDIZER,
            ResourceDefinition::new("Oxidizer", 0.005, StackPrioritySearch, 0.18),
        );
        table.insert(
            stock::SOLID_FUEL,
            ResourceDefinition::new("SolidFuel", 0.0075, NoFlow, 0.6),
        );
        table.insert(
            stock::MONOPROPELLANT,
            ResourceDefinition::new("MonoPropellant", 0.004, StackPrioritySearch, 1.2),
        );
        table.insert(
            stock::XENON_GAS,
            ResourceDefinition::new("XenonGas", 0.0001, StackPrioritySearch, 4.0),
        );
        table.insert(
            stock::ELECTRIC_CHARGE,
            ResourceDefinition::new("ElectricCharge", 0.0, AllVessel, 0.0),
        );
        table.insert(
            stock::INTAKE_AIR,
            ResourceDefinition::new("IntakeAir", 0.0, StackPrioritySearch, 0.0),
        );
        table.insert(stock::ORE, ResourceDefinition::new("Ore", 0.01, AllVessel, 0.02));
        table.insert(
            stock::ABLATOR,
            ResourceDefinition::new("Ablator", 0.001, NoFlow, 0.5),
        );
        table
    }

    pub fn insert(&mut self, id: ResourceId, definition: ResourceDefinition) {
        self.definitions.insert(id, definition);
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceDefinition> {
        self.definitions.get(&id)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.definitions.contains_key(&id)
    }

    pub fn density(&self, id: ResourceId) -> f64 {
        self.get(id).map_or(0.0, |r| r.density)
    }

    pub fn flow_mode(&self, id: ResourceId) -> FlowMode {
        self.get(id).map_or(FlowMode::Null, |r| r.flow_mode)
    }

    pub fn is_free(&self, id: ResourceId) -> bool {
        self.get(id).map_or(false, |r| r.free)
    }

    pub fn unit_cost(&self, id: ResourceId) -> f64 {
        self.get(id).map_or(0.0, |r| r.unit_cost)
    }

    pub fn name(&self, id: ResourceId) -> Option<&str> {
        self.get(id).map(|r| &*r.name)
    }

    /// Looks a resource up by its display name.
    pub fn find(&self, name: &str) -> Option<ResourceId> {
        self.definitions
            .iter()
            .find(|(_, r)| &*r.name == name)
            .map(|(id, _)| *id)
    }
}

/// Sparse mapping of resource type to quantity. Unknown types read as zero.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ResourceLedger {
    entries: BTreeMap<ResourceId, f64>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ResourceId) -> f64 {
        self.entries.get(&id).copied().unwrap_or_default()
    }

    pub fn add(&mut self, id: ResourceId, delta: f64) {
        *self.entries.entry(id).or_default() += delta;
    }

    pub fn set(&mut self, id: ResourceId, amount: f64) {
        self.entries.insert(id, amount);
    }

    pub fn has_type(&self, id: ResourceId) -> bool {
        self.entries.contains_key(&id)
    }

    /// True iff every entry is at or below [`RESOURCE_MIN`].
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|&amount| amount <= RESOURCE_MIN)
    }

    /// True iff none of `ids` holds more than [`RESOURCE_MIN`].
    pub fn is_empty_of<'a>(&self, ids: impl IntoIterator<Item = &'a ResourceId>) -> bool {
        ids.into_iter().all(|&id| self.get(id) <= RESOURCE_MIN)
    }

    /// Total mass in tons, using the densities from `table`.
    pub fn mass(&self, table: &ResourceTable) -> f64 {
        self.entries
            .iter()
            .map(|(&id, &amount)| amount * table.density(id))
            .sum()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, f64)> + '_ {
        self.entries.iter().map(|(&id, &amount)| (id, amount))
    }
}

impl FromIterator<(ResourceId, f64)> for ResourceLedger {
    fn from_iter<I: IntoIterator<Item = (ResourceId, f64)>>(iter: I) -> Self {
        let mut ledger = Self::new();
        for (id, amount) in iter {
            ledger.add(id, amount);
        }
        ledger
    }
}

impl fmt::Display for ResourceLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (id, amount) in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{id}={amount}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn unknown_types_read_as_zero() {
        let mut ledger = ResourceLedger::new();
        assert_eq!(ledger.get(stock::OXIDIZER), 0.0);
        assert!(!ledger.has_type(stock::OXIDIZER));
        ledger.add(stock::OXIDIZER, 5.0);
        ledger.add(stock::OXIDIZER, -2.0);
        assert_eq!(ledger.get(stock::OXIDIZER), 3.0);
        ledger.reset();
        assert!(!ledger.has_type(stock::OXIDIZER));
        assert!(ledger.is_empty());
    }

    #[test]
    fn mass_uses_table_densities() {
        let table = ResourceTable::stock();
        let ledger: ResourceLedger = [
            (stock::LIQUID_FUEL, 90.0),
            (stock::OXIDIZER, 110.0),
            (stock::ELECTRIC_CHARGE, 50.0),
        ]
        .into_iter()
        .collect();
        assert!((ledger.mass(&table) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn free_resources_follow_density() {
        let table = ResourceTable::stock();
        assert!(table.is_free(stock::ELECTRIC_CHARGE));
        assert!(table.is_free(stock::INTAKE_AIR));
        assert!(!table.is_free(stock::XENON_GAS));
        assert_eq!(table.find("SolidFuel"), Some(stock::SOLID_FUEL));
        assert_eq!(table.flow_mode(ResourceId(999)), FlowMode::Null);
    }

    #[test]
    fn loaded_definitions_default_free_from_density() {
        let table: ResourceTable = ron::from_str(
            r#"(definitions: {
                ResourceId(6): (name: "ElectricCharge", density: 0.0, flow_mode: AllVessel),
                ResourceId(8): (name: "Ore", density: 0.01, flow_mode: AllVessel, unit_cost: 0.02),
                ResourceId(10): (name: "Ballast", density: 0.0, flow_mode: NoFlow, free: false),
            })"#,
        )
        .unwrap();
        assert!(table.is_free(stock::ELECTRIC_CHARGE));
        assert!(!table.is_free(stock::ORE));
        assert!(!table.is_free(ResourceId(10)));
        assert_eq!(table.unit_cost(stock::ORE), 0.02);
    }

    #[test]
    fn flow_modes_from_host_encoding() {
        assert_eq!(FlowMode::from(3), FlowMode::StackPrioritySearch);
        assert_eq!(FlowMode::from(42), FlowMode::Null);
        assert_eq!(FlowMode::StageStackFlow.class(), FlowClass::Stack);
        assert_eq!(FlowMode::StagePriorityFlow.class(), FlowClass::Vessel);
    }

    proptest! {
        #[test]
        fn empty_iff_all_at_or_below_threshold(amounts in proptest::collection::vec(0.0f64..0.001, 0..8)) {
            let ledger: ResourceLedger = amounts
                .iter()
                .enumerate()
                .map(|(i, &a)| (ResourceId(i as i32), a))
                .collect();
            prop_assert_eq!(ledger.is_empty(), amounts.iter().all(|&a| a <= RESOURCE_MIN));
        }
    }
}
