// Exit codes for scripted campaigns. Finding bugs is not a failure.
use crate::commands::fuzz::SupervisorError;
use opfuzz_campaign::CampaignError;
use opfuzz_common::ConfigError;
use opfuzz_infer::InferenceError;
use opfuzz_ops::RegistryError;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERIC_FAIL: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_INFRA: i32 = 3;

/// Map an error chain to the exit code of its most specific known cause.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.is::<ConfigError>() || cause.is::<RegistryError>() {
            return EXIT_CONFIG;
        }
        if let Some(err) = cause.downcast_ref::<CampaignError>() {
            return if err.is_config() { EXIT_CONFIG } else { EXIT_INFRA };
        }
        if let Some(err) = cause.downcast_ref::<InferenceError>() {
            return match err {
                InferenceError::Registry(_) | InferenceError::Version { .. } => EXIT_CONFIG,
                InferenceError::Io { .. } | InferenceError::Decode { .. } => EXIT_INFRA,
            };
        }
        if let Some(err) = cause.downcast_ref::<SupervisorError>() {
            return match err {
                SupervisorError::Config => EXIT_CONFIG,
                SupervisorError::RestartsExhausted { .. } => EXIT_INFRA,
            };
        }
        if cause.is::<std::io::Error>() {
            return EXIT_INFRA;
        }
    }
    EXIT_GENERIC_FAIL
}
