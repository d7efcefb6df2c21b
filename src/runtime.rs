//! Worker pool sizing for the parallel pipeline stages

use cloudreg_core::{Error, Result};
use rayon::ThreadPoolBuilder;
use std::env;

/// Fallback thread count when the configuration leaves it unset.
pub const THREADS_ENV_VAR: &str = "CLOUDREG_CPU_THREADS";

/// Thread count for one pipeline run: `configured` first, then
/// [`THREADS_ENV_VAR`]. `None` leaves sizing to the global rayon pool.
pub fn resolve_thread_count(configured: Option<usize>) -> Result<Option<usize>> {
    let from_env = match env::var(THREADS_ENV_VAR) {
        Ok(raw) => Some(raw),
        Err(env::VarError::NotPresent) => None,
        Err(e) => return Err(Error::Config(format!("failed to read {THREADS_ENV_VAR}: {e}"))),
    };
    thread_count_from(configured, from_env.as_deref())
}

fn thread_count_from(configured: Option<usize>, env_value: Option<&str>) -> Result<Option<usize>> {
    let count = match (configured, env_value) {
        (Some(n), _) => n,
        (None, None) => return Ok(None),
        (None, Some(raw)) => raw.trim().parse().map_err(|_| {
            Error::Config(format!(
                "{THREADS_ENV_VAR} must be a positive integer, got '{raw}'"
            ))
        })?,
    };
    if count == 0 {
        return Err(Error::Config("thread count must be at least 1".to_string()));
    }
    Ok(Some(count))
}

/// Run `op` on a dedicated pool of the resolved size, or inline on the
/// global pool when no size is set.
pub fn run_with_threads<R, F>(configured: Option<usize>, op: F) -> Result<R>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    let Some(threads) = resolve_thread_count(configured)? else {
        return Ok(op());
    };
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("cloudreg-worker-{i}"))
        .build()
        .map_err(|e| Error::Config(format!("failed to build thread pool: {e}")))?;
    tracing::debug!(threads, "running on a dedicated pool");
    Ok(pool.install(op))
}
