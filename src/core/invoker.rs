//! The unit-of-work abstraction executed by task queues.

use async_trait::async_trait;

use crate::core::error::AppResult;

/// A caller-supplied function `P -> R` defining the unit of work for one
/// queue.
///
/// The invoker is owned by the [`crate::core::TaskQueue`] it was given to and
/// is executed on a worker thread's runtime. It should be stateless with
/// respect to individual calls; the same invoker instance runs concurrently
/// for every outstanding submission of its queue.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use taskgate::core::{AppResult, Invoker};
///
/// struct Thumbnailer;
///
/// #[async_trait]
/// impl Invoker<Vec<u8>, Vec<u8>> for Thumbnailer {
///     async fn invoke(&self, image: Vec<u8>) -> AppResult<Vec<u8>> {
///         Ok(resize(image, 128)?)
///     }
/// }
/// ```
#[async_trait]
pub trait Invoker<P, R>: Send + Sync + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Execute one unit of work.
    ///
    /// An `Err` settles the corresponding handle as failed and fires the
    /// queue's failure handler.
    async fn invoke(&self, param: P) -> AppResult<R>;
}

/// Adapter wrapping a plain closure as an [`Invoker`].
///
/// Built with [`invoker_fn`]; useful when the unit of work has no async
/// component.
pub struct FnInvoker<F> {
    f: F,
}

#[async_trait]
impl<P, R, F> Invoker<P, R> for FnInvoker<F>
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(P) -> AppResult<R> + Send + Sync + 'static,
{
    async fn invoke(&self, param: P) -> AppResult<R> {
        (self.f)(param)
    }
}

/// Wrap a synchronous closure `Fn(P) -> AppResult<R>` as an [`Invoker`].
pub fn invoker_fn<P, R, F>(f: F) -> FnInvoker<F>
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(P) -> AppResult<R> + Send + Sync + 'static,
{
    FnInvoker { f }
}
