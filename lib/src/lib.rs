#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::float_cmp,
    clippy::doc_markdown
)]
pub mod arena;
pub mod engine;
pub mod math;
pub mod part;
pub mod resources;
pub mod scheduler;
pub mod simulation;
pub mod stage;
pub mod vessel;

pub use resources::{ResourceId, ResourceLedger, ResourceTable};
pub use scheduler::{SchedulerConfig, SimulationResults, SimulationScheduler};
pub use simulation::{SimConditions, Simulation};
pub use stage::Stage;
pub use vessel::{Part, PartId, VesselSnapshot, VesselSource};
