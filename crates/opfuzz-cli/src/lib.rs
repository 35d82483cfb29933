//! opfuzz command-line library
//!
//! The binary is a thin wrapper; subcommands, exit-code mapping and
//! logging setup live here so they can be tested directly.

pub mod commands;
pub mod exit;
pub mod logging;
pub mod settings;
