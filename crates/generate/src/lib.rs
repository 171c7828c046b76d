//! Code generation for cross-architecture thunk libraries.
//!
//! Given a [`Library`] interface description (C-like declarations plus the
//! declarative annotations from [`config`]) and a guest ABI, the generator
//! produces two companion Rust modules:
//!
//! * a **guest** module of packing stubs linked into the emulated binary,
//! * a **host** module that loads the real native library, unpacks
//!   arguments, converts layouts, and calls through.
//!
//! The pipeline is a single pass: [`compat::analyze`] classifies every type
//! the interface mentions and plans each function's conversions, then the
//! two emitters consume that analysis. Output is deterministic: the same
//! (interface, annotations, guest ABI) triple always produces byte-identical
//! files.

pub mod abi;
pub mod compat;
pub mod config;
pub mod error;
mod guest;
mod host;
pub mod interface;
pub mod names;

use std::path::PathBuf;

pub use abi::GuestAbi;
pub use config::{Annotation, ConfigValue, FunctionConfig, ParamConfig, TypeConfig};
pub use error::GenerateError;
pub use interface::{
    CallbackRegistration, EnumDef, FunctionDecl, Library, Member, Scalar, Signature, StructDef,
    Type,
};

/// The two generated modules as source text.
#[derive(Debug)]
pub struct GenOutput {
    pub guest: String,
    pub host: String,
}

/// Where the driver writes the generated modules.
#[derive(Clone, Debug)]
pub struct OutputFilenames {
    pub guest: PathBuf,
    pub host: PathBuf,
}

/// Runs analysis and both emitters.
pub fn generate(lib: &Library, abi: GuestAbi) -> Result<GenOutput, GenerateError> {
    log::debug!("analyzing interface of {} for {abi} guests", lib.name());
    let analysis = compat::analyze(lib, abi)?;
    log::debug!(
        "{} functions, {} callback signatures, {} wrapped types",
        analysis.functions.len(),
        analysis.callbacks.len(),
        analysis.wrapper_order.len(),
    );

    let guest = render(lib, abi, "Guest", guest::generate_guest(lib, &analysis));
    let host = render(lib, abi, "Host", host::generate_host(lib, &analysis));
    Ok(GenOutput { guest, host })
}

/// Generates and writes both modules.
pub fn generate_to_files(
    lib: &Library,
    abi: GuestAbi,
    output: &OutputFilenames,
) -> Result<(), GenerateError> {
    let generated = generate(lib, abi)?;
    for (path, text) in [(&output.guest, &generated.guest), (&output.host, &generated.host)] {
        std::fs::write(path, text).map_err(|source| GenerateError::Output {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("wrote {}", path.display());
    }
    Ok(())
}

fn render(lib: &Library, abi: GuestAbi, side: &str, tokens: proc_macro2::TokenStream) -> String {
    format!(
        "// {side} thunk module for {name}. Generated by thunkgen; do not edit.\n\
         // Guest ABI: {abi}. Allowed argument counts: {arities}.\n\
         \n\
         {code}\n",
        name = lib.name(),
        arities = arity_manifest(),
        code = tokens,
    )
}

/// Renders the sanctioned arity set, compressing runs: `0-18, 23`.
fn arity_manifest() -> String {
    let arities = thunkgen_runtime::packed::ALLOWED_ARITIES;
    let mut parts: Vec<String> = Vec::new();
    let mut i = 0;
    while i < arities.len() {
        let start = arities[i];
        let mut end = start;
        while i + 1 < arities.len() && arities[i + 1] == end + 1 {
            i += 1;
            end = arities[i];
        }
        if start == end {
            parts.push(format!("{start}"));
        } else {
            parts.push(format!("{start}-{end}"));
        }
        i += 1;
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_manifest_compresses_runs() {
        assert_eq!(arity_manifest(), "0-18, 23");
    }
}
