//! Cancellation helpers shared by the reconcilers.

use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{ReconcileError, Result};

/// Run `fut` unless `cancel` fires first.
///
/// Only for calls without side effects on the target cloud, or whose side
/// effect is safe to repeat; a dropped request may still have been applied.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled { instance_id: None }),
        output = fut => Ok(output),
    }
}
