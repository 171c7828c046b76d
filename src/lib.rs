//! Library backing the `thunkgen` CLI: the TOML interface-description
//! reader and the command implementations.

pub mod commands;
pub mod desc;
