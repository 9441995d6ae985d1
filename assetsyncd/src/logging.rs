use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "ASSETSYNC_LOG";
const DEFAULT_DIRECTIVE: &str = "assetsyncd=info";

/// Installs the global subscriber. Output goes to stderr so stdout stays
/// free for command results.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVE))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}
