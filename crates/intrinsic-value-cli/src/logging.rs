use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber. Events go to stderr so stdout stays
/// machine-readable.
///
/// Filter precedence: `--log-level`, then `RUST_LOG`, then `warn`.
pub fn init(log_level: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match log_level {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()?;
    Ok(())
}
