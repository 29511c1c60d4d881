use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::RemoteExecutionSession;
use crate::error::{HarnessError, Result};
use crate::provider::{Provider, TargetSpec};
use crate::staging::ArtifactStore;

/// Start a target, run `body` against it and always stop it afterwards.
///
/// `stop` runs exactly once whether `body` succeeds, fails or panics. When
/// both `body` and the teardown fail, the error carries both.
pub async fn with_session<T, F>(
    provider: Arc<dyn Provider>,
    store: Option<Arc<dyn ArtifactStore>>,
    spec: TargetSpec,
    body: F,
) -> Result<T>
where
    F: for<'a> FnOnce(&'a mut RemoteExecutionSession) -> BoxFuture<'a, Result<T>>,
{
    let mut session = RemoteExecutionSession::new(provider, store);

    let outcome = AssertUnwindSafe(async {
        session.start(spec).await?;
        body(&mut session).await
    })
    .catch_unwind()
    .await;

    let teardown = session.stop().await;

    match outcome {
        Ok(result) => combine(result, teardown),
        Err(panic) => {
            if let Err(e) = teardown {
                tracing::error!("Teardown after panic failed: {}", e);
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// Merge the body's outcome with the teardown's, keeping both failures.
pub(crate) fn combine<T>(result: Result<T>, teardown: Result<()>) -> Result<T> {
    match (result, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(teardown)) => Err(teardown),
        (Err(original), Ok(())) => Err(original),
        (Err(original), Err(teardown)) => Err(HarnessError::TeardownAfterFailure {
            original: Box::new(original),
            teardown: Box::new(teardown),
        }),
    }
}
