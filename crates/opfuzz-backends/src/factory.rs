//! Backend construction from configured names.

use crate::backend::Backend;
use crate::command::CommandBackend;
use crate::faulty::FaultyBackend;
use crate::reference::ReferenceBackend;
use opfuzz_common::ConfigError;

/// Accepted backend name forms, for diagnostics.
pub const KNOWN_BACKENDS: &[&str] = &["reference", "reference-f32", "command:<program> [args..]", "faulty:<mode>[:<op>]"];

/// Build the backend a `backend.targets` entry names.
pub fn create_backend(name: &str) -> Result<Box<dyn Backend>, ConfigError> {
    let name = name.trim();
    if let Some(command) = name.strip_prefix("command:") {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| ConfigError::invalid("backend.targets", "`command:` needs a program"))?;
        return Ok(Box::new(CommandBackend::new(program, words.collect())));
    }
    if let Some(fault) = name.strip_prefix("faulty:") {
        return Ok(Box::new(FaultyBackend::parse(fault)?));
    }
    match name {
        "reference" => Ok(Box::new(ReferenceBackend::f64())),
        "reference-f32" => Ok(Box::new(ReferenceBackend::f32())),
        other => Err(ConfigError::unknown("backend", other, KNOWN_BACKENDS)),
    }
}

/// Check every name resolves, without keeping the backends.
pub fn check_backends<S: AsRef<str>>(names: &[S]) -> Result<(), ConfigError> {
    names.iter().try_for_each(|name| create_backend(name.as_ref()).map(drop))
}
