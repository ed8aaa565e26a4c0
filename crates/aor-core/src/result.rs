// AOR Core - Result model
//
// `AorResult<T>` is the uniform return of every suspension point. The
// monadic surface maps onto `std::result::Result` (`map`, `and_then`,
// `map_err`); this module adds the recovery combinators and the
// panic-capturing adapters.
//
// Chaining discipline: stay in the Result context through service layers
// (`map_err` to translate, `recover*` for fallbacks) and only `fold` at the
// outermost adapter. Logging side effects go through `on_success` /
// `on_failure`, never inside a `fold`.

use crate::error::AorError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Uniform result alias used across the runtime.
pub type AorResult<T> = Result<T, AorError>;

/// Recovery and inspection combinators on [`AorResult`].
pub trait ResultExt<T>: Sized {
    /// Replace a failure with a fallback value. Always yields Ok.
    fn recover(self, f: impl FnOnce(&AorError) -> T) -> AorResult<T>;

    /// Replace a failure with a fallback result.
    fn recover_with(self, f: impl FnOnce(AorError) -> AorResult<T>) -> AorResult<T>;

    /// Collapse into a single value. Outermost adapters only.
    fn fold<R>(self, on_ok: impl FnOnce(T) -> R, on_err: impl FnOnce(AorError) -> R) -> R;

    /// Run a side effect on success, passing the result through unchanged.
    fn on_success(self, f: impl FnOnce(&T)) -> AorResult<T>;

    /// Run a side effect on failure, passing the result through unchanged.
    fn on_failure(self, f: impl FnOnce(&AorError)) -> AorResult<T>;

    /// Extract the value or compute a default from the error.
    fn get_or_else(self, f: impl FnOnce(&AorError) -> T) -> T;
}

impl<T> ResultExt<T> for AorResult<T> {
    fn recover(self, f: impl FnOnce(&AorError) -> T) -> AorResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Ok(f(&e)),
        }
    }

    fn recover_with(self, f: impl FnOnce(AorError) -> AorResult<T>) -> AorResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => f(e),
        }
    }

    fn fold<R>(self, on_ok: impl FnOnce(T) -> R, on_err: impl FnOnce(AorError) -> R) -> R {
        match self {
            Ok(v) => on_ok(v),
            Err(e) => on_err(e),
        }
    }

    fn on_success(self, f: impl FnOnce(&T)) -> AorResult<T> {
        if let Ok(v) = &self {
            f(v);
        }
        self
    }

    fn on_failure(self, f: impl FnOnce(&AorError)) -> AorResult<T> {
        if let Err(e) = &self {
            f(e);
        }
        self
    }

    fn get_or_else(self, f: impl FnOnce(&AorError) -> T) -> T {
        match self {
            Ok(v) => v,
            Err(e) => f(&e),
        }
    }
}

/// Run a block, converting panics into failures.
///
/// Short-circuiting before the block is a plain early `return` at the call
/// site; this adapter only captures exceptional outcomes of the block
/// itself.
pub fn catching<T>(block: impl FnOnce() -> T) -> AorResult<T> {
    std::panic::catch_unwind(AssertUnwindSafe(block)).map_err(AorError::from_panic)
}

/// Run a fallible future, converting panics into failures.
pub async fn catching_async<T, F>(fut: F) -> AorResult<T>
where
    F: Future<Output = AorResult<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(AorError::from_panic(payload)),
    }
}

/// Async form of [`ResultExt::recover_with`]: on failure, await a fallback
/// future built from the error.
///
/// The fallback runs inside the caller's task, so the ambient
/// [`ExecutionContext`](crate::context::ExecutionContext) is preserved
/// across the recovery boundary.
pub async fn recover_with_async<T, F, Fut>(result: AorResult<T>, f: F) -> AorResult<T>
where
    F: FnOnce(AorError) -> Fut,
    Fut: Future<Output = AorResult<T>>,
{
    match result {
        Ok(v) => Ok(v),
        Err(e) => f(e).await,
    }
}
