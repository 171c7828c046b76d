//! The `thunkgen` command line interface.

use anyhow::Result;
use clap::Parser;

use thunkgen_cli::commands::GenerateCommand;

#[derive(Parser)]
#[command(name = "thunkgen", version, about = "Generate cross-architecture thunk modules")]
enum Thunkgen {
    /// Generate the guest and host thunk modules for one native library.
    Generate(GenerateCommand),
}

fn main() -> Result<()> {
    env_logger::init();
    match Thunkgen::parse() {
        Thunkgen::Generate(cmd) => cmd.execute(),
    }
}
