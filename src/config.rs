use std::{collections::BTreeMap, fs, path::Path};

use color_eyre::eyre::{self, bail};
use kerbdv::{
    resources::{FlowMode, ResourceDefinition},
    ResourceId, ResourceTable, SchedulerConfig, SimConditions,
};
use serde::Deserialize;

/// Contents of the optional TOML config file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub conditions: SimConditions,
    pub scheduler: SchedulerConfig,
    /// Extra or replacement resource definitions, keyed by resource name.
    pub resources: BTreeMap<String, ResourceOverride>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ResourceOverride {
    pub id: i32,
    pub density: f64,
    pub flow_mode: FlowMode,
    #[serde(default)]
    pub unit_cost: f64,
}

impl HostConfig {
    pub fn load(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        if config.conditions.gravity < 0.0 {
            bail!("conditions.gravity must not be negative");
        }
        Ok(config)
    }

    /// The stock table with `[resources]` applied on top.
    pub fn resource_table(&self) -> ResourceTable {
        let mut table = ResourceTable::stock();
        for (name, o) in &self.resources {
            table.insert(
                ResourceId(o.id),
                ResourceDefinition::new(name, o.density, o.flow_mode, o.unit_cost),
            );
        }
        table
    }
}
