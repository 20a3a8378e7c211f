//! Logging setup
//!
//! All log output goes to stderr so stdout stays JSON-only. `RUST_LOG`
//! overrides the verbosity derived from CLI flags.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for a `-v` count
#[must_use]
pub fn default_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("sqlsentry={level}")
}

/// Install the global subscriber. Call once, before any work starts.
pub fn init(verbosity: u8) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive(verbosity))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_levels() {
        assert_eq!(default_directive(0), "sqlsentry=warn");
        assert_eq!(default_directive(1), "sqlsentry=info");
        assert_eq!(default_directive(2), "sqlsentry=debug");
        assert_eq!(default_directive(7), "sqlsentry=trace");
    }

    #[test]
    fn test_directives_parse() {
        for v in 0..4 {
            assert!(EnvFilter::try_new(default_directive(v)).is_ok());
        }
    }
}
