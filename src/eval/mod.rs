pub mod judge;
pub mod metrics;
pub mod runner;
pub mod scenario;

pub use runner::{run_scenario, ScenarioResult, TurnRecord};
pub use scenario::{Expectation, Scenario, ScenarioTurn};
