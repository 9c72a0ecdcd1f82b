use tracing_subscriber::{fmt, EnvFilter};

use crate::paths::LOG_FORMAT_ENV;

/// Subscriber for the service itself: `info` and up on stdout, which the
/// launcher points at `meco.log`. `MECO_LOG_FORMAT=json` emits JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Subscriber for control commands: warnings only, on stderr, so command
/// output on stdout stays clean.
pub fn init_cli_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
