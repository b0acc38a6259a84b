pub mod command;
pub mod version;

pub use command::{CommandResult, CommandRunner};
pub use version::{has_update, parse_semver, parse_version_string};
