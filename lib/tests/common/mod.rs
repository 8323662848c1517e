#![allow(dead_code)]

use std::sync::Arc;

use kerbdv::{
    math::H1,
    resources::{stock, FlowMode, ResourceDefinition},
    vessel::{EngineParams, PartModule, Propellant},
    Part, PartId, ResourceId, ResourceTable, SimConditions, Simulation, Stage, VesselSnapshot,
};

/// Single-propellant resource used by the scenario tests.
pub const FUEL: ResourceId = ResourceId(100);

pub fn table() -> Arc<ResourceTable> {
    let mut table = ResourceTable::stock();
    table.insert(
        FUEL,
        ResourceDefinition::new("Fuel", 0.005, FlowMode::AllVessel, 1.0),
    );
    Arc::new(table)
}

pub fn engine(thrust: f64, isp: f64, propellants: &[(ResourceId, f64)]) -> PartModule {
    PartModule::Engines(EngineParams {
        max_thrust: thrust,
        min_thrust: 0.0,
        thrust_percentage: 100.0,
        atmosphere_curve: H1::constant(isp),
        propellants: propellants
            .iter()
            .map(|&(resource, ratio)| Propellant {
                resource,
                ratio,
                ignore_for_isp: false,
            })
            .collect(),
        throttle_locked: false,
        enabled: true,
    })
}

pub fn lfo_engine(thrust: f64, isp: f64) -> PartModule {
    engine(
        thrust,
        isp,
        &[(stock::LIQUID_FUEL, 0.9), (stock::OXIDIZER, 1.1)],
    )
}

pub fn decoupler(id: u32, inverse_stage: i32) -> Part {
    Part::new(id, "decoupler", inverse_stage, 0.05).with_module(PartModule::Decoupler {
        is_omni_decoupler: false,
    })
}

/// A pod on top of `fuels.len()` stacked engine stages. The stage numbered
/// `s` burns an engine tank holding `fuels[s - 1]` units of liquid fuel and
/// the matching oxidizer, hanging off a decoupler that fires in stage
/// `s - 1`.
pub fn stack(fuels: &[f64]) -> VesselSnapshot {
    let mut parts = vec![Part::new(0, "pod", 0, 1.0)];
    let mut parent = PartId(0);
    let mut next_id = 1;
    for (i, &fuel) in fuels.iter().enumerate() {
        let stage = i as i32 + 1;
        let decoupler_id = next_id;
        let tank_id = next_id + 1;
        next_id += 2;
        parts.push(decoupler(decoupler_id, stage - 1).with_parent(parent));
        parts.push(
            Part::new(tank_id, "engine tank", stage, 0.5)
                .with_parent(PartId(decoupler_id))
                .with_resource(stock::LIQUID_FUEL, fuel * 0.9)
                .with_resource(stock::OXIDIZER, fuel * 1.1)
                .with_module(lfo_engine(60.0, 300.0)),
        );
        parent = PartId(tank_id);
    }
    VesselSnapshot::new(parts)
}

pub fn simulate(snapshot: &VesselSnapshot) -> Vec<Stage> {
    Simulation::prepare(snapshot, table(), SimConditions::default())
        .unwrap()
        .run()
        .unwrap()
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 1e-6 * expected.abs().max(1.0),
        "{actual} != {expected}"
    );
}
