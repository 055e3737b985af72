use crate::core::monitor::caches::{CACHE_EXPIRATION, DropLogThrottle, ExecutionDedup};
use crate::core::tasks::jobs::JobClosure;
use crate::err::Result;
use crate::utilities::AsyncLogger;
use std::future::Future;
use std::sync::Arc;

/// Build the cleanup-daemon closure: each run expires dedup and drop-log
/// entries older than [`CACHE_EXPIRATION`]. The caches are locked
/// independently, never together.
pub fn cache_cleanup_closure(
    dedup: Arc<ExecutionDedup>,
    drop_log: Arc<DropLogThrottle>,
    logger: AsyncLogger,
) -> Box<JobClosure> {
    Box::new(move || {
        let dedup = dedup.clone();
        let drop_log = drop_log.clone();
        let logger = logger.clone();
        let fut: std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>> =
            Box::pin(async move {
                dedup.cleanup(CACHE_EXPIRATION);
                drop_log.cleanup(CACHE_EXPIRATION);
                logger.debug("Expired stale dedup and drop-log entries");
                Ok(())
            });
        fut
    })
}
