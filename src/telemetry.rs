use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` overrides `log_level`. Logs go
/// to stderr so command output on stdout stays clean.
pub fn init(log_level: &str) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .map_err(|err| anyhow::anyhow!("invalid log level/filter '{log_level}': {err}"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}
