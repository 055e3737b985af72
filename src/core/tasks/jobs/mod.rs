mod job_cache_cleanup;
mod periodic_job;

use crate::err::Result;
use std::future::Future;
use std::pin::Pin;

pub use job_cache_cleanup::cache_cleanup_closure;
pub use periodic_job::launch_periodic_job;

// A boxed closure that yields a boxed, pinned Future resolving to Result<()>.
pub type JobClosure =
    dyn FnMut() -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>> + Send + 'static;
