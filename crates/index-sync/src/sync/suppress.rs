//! Scoped suppression of automatic dispatch.
//!
//! Inside [`without_auto_index`] no create, update or destroy hook reaches
//! the remote index or the job system. The scope belongs to the calling
//! task, nests, and is unwound on every exit path, including errors and
//! panics. The depth lives in a `tokio` task-local.
//!
//! Explicit operations (`index_record`, `remove_record`, reindexing) are not
//! affected.

use std::future::Future;

tokio::task_local! {
    static SUPPRESSION_DEPTH: usize;
}

fn current_depth() -> usize {
    SUPPRESSION_DEPTH.try_with(|depth| *depth).unwrap_or(0)
}

/// Returns true when the current task is inside a suppression scope.
pub fn is_suppressed() -> bool {
    current_depth() > 0
}

/// Runs `fut` with automatic dispatch suppressed.
///
/// ```
/// use index_sync::sync::{is_suppressed, without_auto_index};
///
/// # tokio_test_block_on(async {
/// assert!(!is_suppressed());
/// let inside = without_auto_index(async { is_suppressed() }).await;
/// assert!(inside);
/// assert!(!is_suppressed());
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub async fn without_auto_index<F>(fut: F) -> F::Output
where
    F: Future,
{
    SUPPRESSION_DEPTH.scope(current_depth() + 1, fut).await
}

/// Runs a synchronous closure with automatic dispatch suppressed.
pub fn without_auto_index_sync<T>(f: impl FnOnce() -> T) -> T {
    SUPPRESSION_DEPTH.sync_scope(current_depth() + 1, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_nests_and_unwinds() {
        assert!(!is_suppressed());
        without_auto_index(async {
            assert_eq!(current_depth(), 1);
            without_auto_index(async {
                assert_eq!(current_depth(), 2);
            })
            .await;
            assert_eq!(current_depth(), 1);
        })
        .await;
        assert!(!is_suppressed());
    }

    #[tokio::test]
    async fn test_scope_restored_after_error() {
        let result: Result<(), &str> = without_auto_index(async {
            assert!(is_suppressed());
            Err("boom")
        })
        .await;
        assert!(result.is_err());
        assert!(!is_suppressed());
    }

    #[tokio::test]
    async fn test_scope_is_task_local() {
        without_auto_index(async {
            let other = tokio::spawn(async { is_suppressed() }).await.unwrap();
            assert!(!other);
        })
        .await;
    }

    #[test]
    fn test_sync_scope() {
        assert!(without_auto_index_sync(is_suppressed));
        assert!(!is_suppressed());
    }
}
