//! CommandExecutor service: responsibility and boundaries
//!
//! This module and its submodules are responsible ONLY for running the external
//! window query tool and turning its stdout into raw window handles. It MUST NOT
//! interpret titles, merge state or touch persisted attributes; those belong to
//! TitleParser, Detector and StateStore.

mod dry_run;
mod executor;
#[cfg(test)]
pub(crate) mod fake;
mod query;
mod records;
mod r#trait;

pub use self::executor::CommandExecutor;
pub use self::dry_run::DryRunSource;
pub use self::query::run_command;
pub use self::records::records_from_value;
pub use self::r#trait::{create_window_source, SourceStats, WindowSource};
