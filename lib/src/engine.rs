//! Per-engine thrust, Isp and propellant consumption.

use std::fmt;

use tracing::trace;

use crate::{
    math::{lerp, G0},
    resources::{ResourceLedger, ResourceTable},
    vessel::{EngineParams, Part, PartId, PartModule},
};

/// Which kind of engine module an [`SimEngine`] was derived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineKind {
    Standard,
    Fx { engine_id: String },
    /// The running mode of a multi-mode engine.
    MultiMode { engine_id: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimEngine {
    pub kind: EngineKind,
    /// The part this engine belongs to.
    pub part: PartId,
    /// Thrust at the thrust limiter setting (kN)
    pub thrust: f64,
    /// Thrust at the current throttle (kN). Zero unless flying.
    pub actual_thrust: f64,
    /// Specific impulse at the simulated pressure (s)
    pub isp: f64,
    /// Mass flow rate (t/s)
    pub mass_flow_rate: f64,
    /// Consumption of each propellant, in units per second. Free
    /// propellants are left out.
    pub resource_consumptions: ResourceLedger,
    pub throttle_locked: bool,
}

impl SimEngine {
    /// Derives the engines a part contributes, one per engine module, or only
    /// the running mode for a multi-mode engine.
    ///
    /// `throttle` is `Some` only when modelling a live vessel.
    pub fn derive_all(
        part: &Part,
        pressure: f64,
        throttle: Option<f64>,
        table: &ResourceTable,
    ) -> Vec<SimEngine> {
        let running_mode = part.modules.iter().find_map(|m| match m {
            PartModule::MultiModeEngine {
                primary,
                secondary,
                running_primary,
            } => Some(if *running_primary { primary } else { secondary }),
            _ => None,
        });

        let mut engines = vec![];
        for module in &part.modules {
            let (kind, params) = match (module, running_mode) {
                (PartModule::Engines(params), _) => (EngineKind::Standard, params),
                (PartModule::EnginesFx { engine_id, params }, None) => (
                    EngineKind::Fx {
                        engine_id: engine_id.clone(),
                    },
                    params,
                ),
                (PartModule::EnginesFx { engine_id, params }, Some(mode)) => {
                    if engine_id != mode {
                        continue;
                    }
                    (
                        EngineKind::MultiMode {
                            engine_id: engine_id.clone(),
                        },
                        params,
                    )
                }
                _ => continue,
            };

            if !params.enabled {
                trace!("SimEngine::derive_all: {} skipping disabled engine", part.name);
                continue;
            }

            engines.push(Self::new(kind, part.id, params, pressure, throttle, table));
        }
        engines
    }

    pub fn new(
        kind: EngineKind,
        part: PartId,
        params: &EngineParams,
        pressure: f64,
        throttle: Option<f64>,
        table: &ResourceTable,
    ) -> Self {
        let thrust = lerp(
            params.min_thrust,
            params.max_thrust,
            params.thrust_percentage / 100.0,
        );
        let isp = params.atmosphere_curve.evaluate(pressure);
        let mass_flow_rate = flow_rate(thrust, isp);

        let flow_mass: f64 = params
            .propellants
            .iter()
            .filter(|p| !p.ignore_for_isp)
            .map(|p| p.ratio * table.density(p.resource))
            .sum();

        let mut resource_consumptions = ResourceLedger::new();
        for propellant in &params.propellants {
            if table.is_free(propellant.resource) {
                continue;
            }
            let rate = if flow_mass > 0.0 {
                propellant.ratio * mass_flow_rate / flow_mass
            } else {
                0.0
            };
            resource_consumptions.add(propellant.resource, rate);
        }

        Self {
            kind,
            part,
            thrust,
            actual_thrust: throttle.map_or(0.0, |t| thrust * t),
            isp,
            mass_flow_rate,
            resource_consumptions,
            throttle_locked: params.throttle_locked,
        }
    }
}

/// Mass flow (t/s) for a thrust (kN) at an Isp (s).
pub fn flow_rate(thrust: f64, isp: f64) -> f64 {
    if isp > 0.0 {
        thrust / (isp * G0)
    } else {
        0.0
    }
}

impl fmt::Display for SimEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Engine({:?}) part={:?} thrust={} actual={} isp={} consumption: {}",
            self.kind, self.part, self.thrust, self.actual_thrust, self.isp, self.resource_consumptions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{math::H1, resources::stock, vessel::Propellant};

    fn terrier() -> EngineParams {
        let mut atmosphere_curve = H1::new();
        atmosphere_curve.add(0.0, 345.0);
        atmosphere_curve.add(1.0, 85.0);
        EngineParams {
            max_thrust: 60.0,
            min_thrust: 0.0,
            thrust_percentage: 100.0,
            atmosphere_curve,
            propellants: vec![
                Propellant {
                    resource: stock::LIQUID_FUEL,
                    ratio: 0.9,
                    ignore_for_isp: false,
                },
                Propellant {
                    resource: stock::OXIDIZER,
                    ratio: 1.1,
                    ignore_for_isp: false,
                },
            ],
            throttle_locked: false,
            enabled: true,
        }
    }

    #[test]
    fn consumption_matches_mass_flow() {
        let table = ResourceTable::stock();
        let engine = SimEngine::new(
            EngineKind::Standard,
            PartId(0),
            &terrier(),
            0.0,
            None,
            &table,
        );
        assert_eq!(engine.isp, 345.0);
        assert!((engine.mass_flow_rate - 60.0 / (345.0 * G0)).abs() < 1e-12);
        assert!((engine.resource_consumptions.mass(&table) - engine.mass_flow_rate).abs() < 1e-12);
        let lf = engine.resource_consumptions.get(stock::LIQUID_FUEL);
        let ox = engine.resource_consumptions.get(stock::OXIDIZER);
        assert!((lf / ox - 0.9 / 1.1).abs() < 1e-12);
        assert_eq!(engine.actual_thrust, 0.0);
    }

    #[test]
    fn free_propellants_are_left_out() {
        let table = ResourceTable::stock();
        let mut params = terrier();
        params.propellants.push(Propellant {
            resource: stock::ELECTRIC_CHARGE,
            ratio: 5.0,
            ignore_for_isp: true,
        });
        let engine = SimEngine::new(EngineKind::Standard, PartId(0), &params, 1.0, Some(0.5), &table);
        assert!(!engine.resource_consumptions.has_type(stock::ELECTRIC_CHARGE));
        assert_eq!(engine.isp, 85.0);
        assert_eq!(engine.actual_thrust, 30.0);
    }

    #[test]
    fn ignored_propellant_is_drawn_outside_mass_flow() {
        let table = ResourceTable::stock();
        let baseline =
            SimEngine::new(EngineKind::Standard, PartId(0), &terrier(), 0.0, None, &table);
        let mut params = terrier();
        params.propellants.push(Propellant {
            resource: stock::MONOPROPELLANT,
            ratio: 0.5,
            ignore_for_isp: true,
        });
        let engine = SimEngine::new(EngineKind::Standard, PartId(0), &params, 0.0, None, &table);
        let lf = engine.resource_consumptions.get(stock::LIQUID_FUEL);
        let mono = engine.resource_consumptions.get(stock::MONOPROPELLANT);
        assert!((lf - baseline.resource_consumptions.get(stock::LIQUID_FUEL)).abs() < 1e-12);
        assert!((mono / lf - 0.5 / 0.9).abs() < 1e-12);
        assert!(engine.resource_consumptions.mass(&table) > engine.mass_flow_rate);
    }

    #[test]
    fn thrust_limiter_scales_between_min_and_max() {
        let table = ResourceTable::stock();
        let mut params = terrier();
        params.min_thrust = 10.0;
        params.thrust_percentage = 50.0;
        let engine = SimEngine::new(EngineKind::Standard, PartId(0), &params, 0.0, None, &table);
        assert_eq!(engine.thrust, 35.0);
    }

    #[test]
    fn multi_mode_only_derives_running_mode() {
        let table = ResourceTable::stock();
        let part = Part::new(0, "rapier", 0, 2.0)
            .with_module(PartModule::EnginesFx {
                engine_id: "AirBreathing".into(),
                params: terrier(),
            })
            .with_module(PartModule::EnginesFx {
                engine_id: "ClosedCycle".into(),
                params: terrier(),
            })
            .with_module(PartModule::MultiModeEngine {
                primary: "AirBreathing".into(),
                secondary: "ClosedCycle".into(),
                running_primary: false,
            });
        let engines = SimEngine::derive_all(&part, 0.0, None, &table);
        assert_eq!(engines.len(), 1);
        assert_eq!(
            engines[0].kind,
            EngineKind::MultiMode {
                engine_id: "ClosedCycle".into()
            }
        );
    }
}
