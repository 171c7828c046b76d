use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use thunkgen_generate::{GuestAbi, OutputFilenames};

/// Generates the guest and host thunk modules for one native library.
#[derive(Parser)]
pub struct GenerateCommand {
    /// The interface description file (TOML).
    #[arg(long)]
    input: PathBuf,

    /// The guest ABI to generate for.
    #[arg(long, value_parser = parse_abi, default_value = "x86_64")]
    guest_abi: GuestAbi,

    /// Where to write the generated guest module.
    #[arg(long)]
    guest: PathBuf,

    /// Where to write the generated host module.
    #[arg(long)]
    host: PathBuf,
}

fn parse_abi(s: &str) -> Result<GuestAbi, String> {
    match s {
        "x86_32" => Ok(GuestAbi::X86_32),
        "x86_64" => Ok(GuestAbi::X86_64),
        other => Err(format!("unknown guest ABI `{other}` (expected x86_32 or x86_64)")),
    }
}

impl GenerateCommand {
    pub fn execute(self) -> Result<()> {
        let text = std::fs::read_to_string(&self.input)
            .with_context(|| format!("failed to read {}", self.input.display()))?;
        let lib = crate::desc::parse(&text)
            .with_context(|| format!("invalid interface description {}", self.input.display()))?;
        let output = OutputFilenames { guest: self.guest, host: self.host };
        thunkgen_generate::generate_to_files(&lib, self.guest_abi, &output)
            .with_context(|| format!("generation failed for {}", lib.name()))?;
        Ok(())
    }
}
