//! CLI command implementations

pub mod error;
pub mod export;
pub mod sources;
pub mod validate;

pub use error::CliError;
pub use export::{Cli, Commands, ExportArgs, ExportSummary};
pub use sources::SourcesCommand;
pub use validate::ValidateCommand;
