mod scheduler;

use crate::sim::{EnvConfig, Environment};

/// Environment that records a trace.
pub(crate) fn traced_env() -> Environment {
    Environment::with_config(EnvConfig {
        trace: true,
        ..EnvConfig::default()
    })
}
