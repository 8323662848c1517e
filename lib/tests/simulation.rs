mod common;

use common::{assert_close, decoupler, engine, lfo_engine, simulate, stack, table, FUEL};
use kerbdv::{
    math::H1,
    resources::stock,
    vessel::{NodeType, PartModule, VesselContext},
    Part, PartId, SimConditions, Simulation, VesselSnapshot,
};
use proptest::prelude::*;

const G0: f64 = 9.81;

#[test]
fn single_tank_burns_to_empty() {
    let vessel = VesselSnapshot::new(vec![Part::new(0, "rocket", 0, 1.0)
        .with_resource(FUEL, 100.0)
        .with_module(engine(200.0, 300.0, &[(FUEL, 1.0)]))]);
    let stages = simulate(&vessel);

    assert_eq!(stages.len(), 1);
    let stage = &stages[0];
    assert_eq!(stage.number, 0);
    assert_close(stage.mass, 1.5);
    assert_close(stage.delta_v, 300.0 * G0 * (1.5_f64 / 1.0).ln());
    assert_close(stage.isp, 300.0);
    // 0.5 t at 200 kN / (300 s * g0)
    assert_close(stage.time, 0.5 * 300.0 * G0 / 200.0);
    assert!(stage.time > 0.0);
    assert_close(stage.thrust, 200.0);
    assert_close(stage.thrust_to_weight, 200.0 / (1.5 * G0));
    assert_close(stage.max_thrust_to_weight, 200.0 / (1.0 * G0));
    assert_close(stage.cost, 100.0);
    assert_eq!(stage.total_delta_v, stage.delta_v);
    assert_eq!(stage.inverse_total_delta_v, stage.delta_v);
}

#[test]
fn empty_no_flow_tank_starves_engine() {
    let vessel = VesselSnapshot::new(vec![Part::new(0, "spent booster", 0, 1.5)
        .with_resource(stock::SOLID_FUEL, 0.0)
        .with_module(engine(200.0, 200.0, &[(stock::SOLID_FUEL, 1.0)]))]);
    let stages = simulate(&vessel);

    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0].delta_v, 0.0);
    assert_eq!(stages[0].time, 0.0);
    assert_eq!(stages[0].thrust, 0.0);
}

#[test]
fn no_flow_propellant_is_not_shared() {
    // The second booster has no fuel of its own and may not draw from the
    // first one even though they are stacked together.
    let vessel = VesselSnapshot::new(vec![
        Part::new(0, "booster", 0, 1.0)
            .with_resource(stock::SOLID_FUEL, 100.0)
            .with_node("bottom", NodeType::Stack, Some(PartId(1)))
            .with_module(engine(100.0, 200.0, &[(stock::SOLID_FUEL, 1.0)])),
        Part::new(1, "empty booster", 0, 1.0)
            .with_parent(PartId(0))
            .with_resource(stock::SOLID_FUEL, 0.0)
            .with_node("top", NodeType::Stack, Some(PartId(0)))
            .with_module(engine(100.0, 200.0, &[(stock::SOLID_FUEL, 1.0)])),
    ]);
    let stages = simulate(&vessel);
    assert_close(stages[0].thrust, 100.0);
}

#[test]
fn decoupler_sheds_empty_tank_without_draining() {
    let lf = stock::LIQUID_FUEL;
    let ox = stock::OXIDIZER;
    let vessel = VesselSnapshot::new(vec![
        Part::new(0, "core", 1, 1.0)
            .with_resource(lf, 90.0)
            .with_resource(ox, 110.0)
            .with_module(lfo_engine(60.0, 300.0)),
        decoupler(1, 0).with_parent(PartId(0)),
        Part::new(2, "empty tank", 0, 0.25)
            .with_parent(PartId(1))
            .with_resource(lf, 0.0)
            .with_resource(ox, 0.0),
    ]);
    let stages = simulate(&vessel);

    assert_eq!(stages.len(), 2);
    assert_eq!(stages[1].delta_v, 0.0);
    assert_eq!(stages[1].time, 0.0);
    assert_close(stages[1].mass, 0.3);
    assert_eq!(stages[1].part_count, 2);
    assert_eq!(stages[1].total_part_count, 3);

    assert_close(stages[0].delta_v, 300.0 * G0 * (2.0_f64 / 1.0).ln());
    assert_eq!(stages[0].total_part_count, 1);
    assert_close(stages[0].total_mass, 2.0);
    assert_close(stages[1].total_mass, 2.3);
    assert_close(stages[0].inverse_total_delta_v, stages[0].delta_v);
}

#[test]
fn cyclic_fuel_lines_starve_engine() {
    let lf = stock::LIQUID_FUEL;
    let ox = stock::OXIDIZER;
    let vessel = VesselSnapshot::new(vec![
        Part::new(0, "engine", 0, 1.0)
            .with_crossfeed(false)
            .with_module(lfo_engine(60.0, 300.0)),
        Part::new(1, "line to engine", 0, 0.05)
            .with_parent(PartId(2))
            .with_module(PartModule::FuelLine {
                target: Some(PartId(0)),
            }),
        Part::new(2, "a", 0, 0.1).with_parent(PartId(0)),
        Part::new(3, "b", 0, 0.1).with_parent(PartId(0)),
        Part::new(4, "line a to b", 0, 0.05)
            .with_parent(PartId(2))
            .with_module(PartModule::FuelLine {
                target: Some(PartId(3)),
            }),
        Part::new(5, "line b to a", 0, 0.05)
            .with_parent(PartId(3))
            .with_module(PartModule::FuelLine {
                target: Some(PartId(2)),
            }),
        Part::new(6, "sealed tank", 0, 0.1)
            .with_parent(PartId(0))
            .with_resource(lf, 90.0)
            .with_resource(ox, 110.0),
    ]);
    let stages = simulate(&vessel);

    assert_eq!(stages[0].thrust, 0.0);
    assert_eq!(stages[0].delta_v, 0.0);
}

#[test]
fn fuel_line_feeds_core_from_side_tank() {
    let lf = stock::LIQUID_FUEL;
    let ox = stock::OXIDIZER;
    let vessel = VesselSnapshot::new(vec![
        Part::new(0, "core engine", 0, 1.0)
            .with_crossfeed(false)
            .with_module(lfo_engine(60.0, 300.0)),
        Part::new(1, "side tank", 0, 0.1)
            .with_parent(PartId(0))
            .with_resource(lf, 90.0)
            .with_resource(ox, 110.0),
        Part::new(2, "fuel line", 0, 0.05)
            .with_parent(PartId(1))
            .with_module(PartModule::FuelLine {
                target: Some(PartId(0)),
            }),
    ]);
    let stages = simulate(&vessel);
    assert_close(stages[0].thrust, 60.0);
    assert_close(stages[0].delta_v, 300.0 * G0 * (2.15_f64 / 1.15).ln());
}

#[test]
fn runs_are_idempotent() {
    let vessel = stack(&[200.0, 400.0, 800.0]);
    let first = simulate(&vessel);
    let second = simulate(&vessel.clone());
    assert_eq!(first, second);
}

#[test]
fn stacked_stages_burn_top_down() {
    let stages = simulate(&stack(&[200.0, 400.0]));
    assert_eq!(stages.len(), 3);
    assert_eq!(stages[0].delta_v, 0.0);
    assert!(stages[1].delta_v > 0.0);
    assert!(stages[2].delta_v > 0.0);
    assert_close(
        stages[0].inverse_total_delta_v,
        stages[1].delta_v + stages[2].delta_v,
    );
    assert_close(stages[2].total_delta_v, stages[0].inverse_total_delta_v);
    assert_eq!(stages[2].total_part_count, 5);
    assert_eq!(stages[0].total_part_count, 1);
}

#[test]
fn flight_starts_at_current_stage_with_live_throttle() {
    let mut vessel = stack(&[200.0, 400.0]);
    vessel.context = VesselContext::Flight {
        throttle: 0.5,
        current_stage: 1,
    };
    let stages = Simulation::prepare(&vessel, table(), SimConditions::default())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(stages.len(), 2);
    // stage 2 has not been shed yet, so both engines burn together
    assert_close(stages[1].thrust, 120.0);
    assert_close(stages[1].actual_thrust, 60.0);
}

#[test]
fn sepratron_does_not_block_staging() {
    let mut sepratron = Part::new(2, "sepratron", 1, 0.01)
        .with_parent(PartId(1))
        .with_resource(stock::SOLID_FUEL, 8.0)
        .with_module(engine(18.0, 154.0, &[(stock::SOLID_FUEL, 1.0)]));
    if let Some(PartModule::Engines(params)) = sepratron.modules.first_mut() {
        params.throttle_locked = true;
    }
    sepratron.activates_even_if_disconnected = true;

    let lf = stock::LIQUID_FUEL;
    let ox = stock::OXIDIZER;
    let vessel = VesselSnapshot::new(vec![
        Part::new(0, "core", 1, 1.0)
            .with_resource(lf, 90.0)
            .with_resource(ox, 110.0)
            .with_module(lfo_engine(60.0, 300.0)),
        decoupler(1, 0).with_parent(PartId(0)),
        sepratron,
    ]);
    let stages = simulate(&vessel);
    assert_eq!(stages[1].time, 0.0);
    assert!(stages[0].delta_v > 0.0);
}

#[test]
fn nan_resource_is_ignored() {
    let vessel = VesselSnapshot::new(vec![Part::new(0, "rocket", 0, 1.0)
        .with_resource(FUEL, 100.0)
        .with_resource(stock::ORE, f64::NAN)
        .with_module(engine(200.0, 300.0, &[(FUEL, 1.0)]))]);
    let stages = simulate(&vessel);
    assert_close(stages[0].delta_v, 300.0 * G0 * 1.5_f64.ln());
}

#[test]
fn long_burns_stop_at_the_step_limit() {
    // Every tank holds a different amount, so each step empties exactly one
    // of them and the burn needs more steps than a stage allows.
    let mut parts =
        vec![Part::new(0, "core", 0, 1.0).with_module(engine(200.0, 300.0, &[(FUEL, 1.0)]))];
    for i in 1..=1200 {
        parts.push(
            Part::new(i, "tank", 0, 0.01)
                .with_parent(PartId(0))
                .with_resource(FUEL, f64::from(i)),
        );
    }
    let stages = simulate(&VesselSnapshot::new(parts));

    assert_eq!(stages.len(), 1);
    let stage = &stages[0];
    let start_mass = 1.0 + 1200.0 * 0.01 + 0.005 * (1200.0 * 1201.0 / 2.0);
    let dry_mass = 1.0 + 1200.0 * 0.01;
    // After 1000 steps the 200 largest tanks still hold 1..=200 units.
    let end_mass = dry_mass + 0.005 * (200.0 * 201.0 / 2.0);
    assert_close(stage.mass, start_mass);
    assert!(stage.delta_v.is_finite());
    assert!((stage.delta_v - 300.0 * G0 * (start_mass / end_mass).ln()).abs() < 1.0);
    assert!(stage.delta_v < 300.0 * G0 * (start_mass / dry_mass).ln());
}

#[test]
fn burn_times_past_the_ceiling_are_reported_as_zero() {
    let vessel = VesselSnapshot::new(vec![Part::new(0, "rocket", 0, 1.0)
        .with_resource(FUEL, 100_000.0)
        .with_module(engine(1.0, 300.0, &[(FUEL, 1.0)]))]);
    let stages = simulate(&vessel);

    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0].time, 0.0);
    assert_eq!(stages[0].total_time, 0.0);
    assert_close(stages[0].delta_v, 300.0 * G0 * 501.0_f64.ln());
}

#[test]
fn engine_without_isp_burns_nothing() {
    let mut module = engine(200.0, 300.0, &[(FUEL, 1.0)]);
    if let PartModule::Engines(params) = &mut module {
        params.atmosphere_curve = H1::new();
    }
    let vessel = VesselSnapshot::new(vec![Part::new(0, "rocket", 0, 1.0)
        .with_resource(FUEL, 100.0)
        .with_module(module)]);
    let stages = simulate(&vessel);

    assert_eq!(stages.len(), 1);
    let stage = &stages[0];
    assert_close(stage.thrust, 200.0);
    assert_eq!(stage.delta_v, 0.0);
    assert_eq!(stage.time, 0.0);
    assert_eq!(stage.isp, 0.0);
    assert_close(stage.mass, 1.5);
}

#[test]
fn demo_vessel_parses_and_runs() {
    let vessel: VesselSnapshot =
        ron::from_str(include_str!("../../demos/kerbal_x.ron")).unwrap();
    let stages = simulate(&vessel);
    assert_eq!(stages.len() as i32, vessel.last_stage() + 1);
    assert!(stages.iter().all(|s| s.delta_v.is_finite() && s.delta_v >= 0.0));
    assert!(stages.last().unwrap().inverse_total_delta_v > 0.0);
}

proptest! {
    #[test]
    fn totals_match_stage_sums(fuels in prop::collection::vec(10.0..2000.0_f64, 1..5)) {
        let stages = simulate(&stack(&fuels));
        prop_assert_eq!(stages.len(), fuels.len() + 1);
        for i in 0..stages.len() {
            let prefix: f64 = stages[..=i].iter().map(|s| s.delta_v).sum();
            let suffix: f64 = stages[i..].iter().map(|s| s.delta_v).sum();
            prop_assert!((stages[i].total_delta_v - prefix).abs() < 1e-6);
            prop_assert!((stages[i].inverse_total_delta_v - suffix).abs() < 1e-6);
            prop_assert!(stages[i].delta_v >= 0.0);
        }
    }
}
