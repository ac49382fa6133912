use anyhow::Result;
use tracing_subscriber::fmt;

/// Installs the subscriber only with `--verbose`. Logs go to stderr because
/// stdout carries the region JSON in one-shot mode.
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    let _ = fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
    Ok(())
}
