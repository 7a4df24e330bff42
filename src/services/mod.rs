pub mod activator;
pub mod command_executor;
pub mod detector;
pub mod orchestrator;
pub mod state_store;
pub mod title_parser;

pub use activator::{create_window_activator, WindowActivator};
pub use command_executor::{create_window_source, WindowSource};
pub use detector::{Detector, DetectorStats};
pub use orchestrator::{OrganizeLayout, Orchestrator, Statistics};
pub use state_store::{StateSnapshot, StateStore};
pub use title_parser::TitleParser;
