#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod asset;
pub mod automation;
pub mod credential;
pub mod db;
pub mod hooks;
pub mod inventory;
pub mod job;
pub mod manager;
pub mod plan;
pub mod procedure;
pub mod reduce;
pub mod runner;
pub mod scrub;
pub mod sequencer;
pub mod util;
pub mod workspace;

pub use manager::JobOutcome;
pub use manager::JobReport;
pub use manager::Manager;
pub use manager::Settings;
