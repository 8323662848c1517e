use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::G0;

/// Results for one stage of the vessel. Indexed by stage number in the
/// vector returned from [`Simulation::run`](crate::simulation::Simulation::run).
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// The stage number, counting down to zero.
    pub number: i32,

    /// Cost of the parts shed when this stage separates (funds)
    pub cost: f64,
    /// Cost of this stage and every stage after it (funds)
    pub total_cost: f64,

    /// Mass of the parts shed when this stage separates (tons)
    pub mass: f64,
    /// Mass of this stage and every stage after it (tons)
    pub total_mass: f64,

    /// Burn time of this stage (s). Zero if it would not finish.
    pub time: f64,
    /// Cumulative burn time up to and including this stage (s)
    pub total_time: f64,

    /// Delta-v from this stage's burn (m/s)
    pub delta_v: f64,
    /// Delta-v of this stage and every stage below it (m/s)
    pub total_delta_v: f64,
    /// Delta-v of this stage and every stage above it (m/s)
    pub inverse_total_delta_v: f64,

    /// Effective specific impulse over the burn (s)
    pub isp: f64,
    /// Thrust of all active engines at the thrust limiter (kN)
    pub thrust: f64,
    /// Thrust of all active engines at the live throttle (kN)
    pub actual_thrust: f64,
    pub thrust_to_weight: f64,
    pub max_thrust_to_weight: f64,
    pub actual_thrust_to_weight: f64,

    /// Parts shed when this stage separates.
    pub part_count: usize,
    /// Parts still attached at the start of this stage.
    pub total_part_count: usize,
}

impl Stage {
    pub fn new(number: i32) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    /// Fills the prefix and suffix sums over a complete, zero-indexed stage
    /// list.
    pub fn accumulate(stages: &mut [Stage]) {
        let mut total_cost = 0.0;
        let mut total_mass = 0.0;
        let mut total_delta_v = 0.0;
        let mut total_time = 0.0;
        for stage in stages.iter_mut() {
            total_cost += stage.cost;
            total_mass += stage.mass;
            total_delta_v += stage.delta_v;
            total_time += stage.time;
            stage.total_cost = total_cost;
            stage.total_mass = total_mass;
            stage.total_delta_v = total_delta_v;
            stage.total_time = if total_time > 9999.0 { 0.0 } else { total_time };
        }

        let mut inverse_total_delta_v = 0.0;
        for stage in stages.iter_mut().rev() {
            inverse_total_delta_v += stage.delta_v;
            stage.inverse_total_delta_v = inverse_total_delta_v;
        }
    }
}

/// Thrust (kN) over weight of `mass` (t) under `gravity` (m/s^2).
pub fn thrust_to_weight(thrust: f64, mass: f64, gravity: f64) -> f64 {
    if mass > 0.0 && gravity > 0.0 {
        thrust / (mass * gravity)
    } else {
        0.0
    }
}

/// Effective Isp that yields `delta_v` over a burn from `start_mass` to
/// `end_mass`.
pub fn effective_isp(delta_v: f64, start_mass: f64, end_mass: f64) -> f64 {
    if start_mass > 0.0 && end_mass > 0.0 && start_mass > end_mass {
        delta_v / (G0 * (start_mass / end_mass).ln())
    } else {
        0.0
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stage {}: cost={} ({}) mass={} ({}) isp={:.1} thrust={:.1} twr={:.2} maxTwr={:.2} \
             time={:.1} ({:.1}) dv={:.1} ({:.1}, inverse {:.1}) parts={} ({})",
            self.number,
            self.cost,
            self.total_cost,
            self.mass,
            self.total_mass,
            self.isp,
            self.thrust,
            self.thrust_to_weight,
            self.max_thrust_to_weight,
            self.time,
            self.total_time,
            self.delta_v,
            self.total_delta_v,
            self.inverse_total_delta_v,
            self.part_count,
            self.total_part_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn effective_isp_inverts_rocket_equation() {
        let dv = 300.0 * G0 * (4.0_f64 / 2.0).ln();
        assert!((effective_isp(dv, 4.0, 2.0) - 300.0).abs() < 1e-9);
        assert_eq!(effective_isp(dv, 2.0, 2.0), 0.0);
    }

    #[test]
    fn long_total_time_is_zeroed() {
        let mut stages = [Stage::new(0), Stage::new(1)];
        stages[0].time = 9000.0;
        stages[1].time = 1000.0;
        Stage::accumulate(&mut stages);
        assert_eq!(stages[0].total_time, 9000.0);
        assert_eq!(stages[1].total_time, 0.0);
    }

    proptest! {
        #[test]
        fn totals_are_prefix_and_suffix_sums(
            dvs in prop::collection::vec(0.0..5000.0_f64, 1..8),
            masses in prop::collection::vec(0.0..50.0_f64, 8),
        ) {
            let mut stages: Vec<Stage> = dvs
                .iter()
                .zip(&masses)
                .enumerate()
                .map(|(i, (&delta_v, &mass))| Stage {
                    delta_v,
                    mass,
                    ..Stage::new(i as i32)
                })
                .collect();
            Stage::accumulate(&mut stages);

            let n = stages.len();
            for i in 0..n {
                let prefix: f64 = stages[..=i].iter().map(|s| s.delta_v).sum();
                let suffix: f64 = stages[i..].iter().map(|s| s.delta_v).sum();
                let mass: f64 = stages[..=i].iter().map(|s| s.mass).sum();
                prop_assert!((stages[i].total_delta_v - prefix).abs() < 1e-6);
                prop_assert!((stages[i].inverse_total_delta_v - suffix).abs() < 1e-6);
                prop_assert!((stages[i].total_mass - mass).abs() < 1e-6);
            }
            prop_assert!((stages[0].inverse_total_delta_v - stages[n - 1].total_delta_v).abs() < 1e-6);
        }
    }
}
