//! The CLI's subcommands.

mod generate;

pub use generate::GenerateCommand;
