use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use oneshot::Sender;
use pin_project::pin_project;

/// A heap allocated coroutine body, type-erased once its result is routed to its [`Task`].
///
/// [`Task`]: crate::task::Task
pub(crate) type HeapBody = Pin<Box<dyn Future<Output = ()>>>;

/// The body of a coroutine together with the channel its return value is sent through.
#[pin_project]
pub(crate) struct Frame<F: Future> {
    #[pin]
    future: F,
    result_sender: Option<Sender<F::Output>>,
}

impl<F: Future> Frame<F> {
    pub(crate) fn new(future: F, result_sender: Sender<F::Output>) -> Self {
        Self {
            future,
            result_sender: Some(result_sender),
        }
    }
}

impl<F: Future> Future for Frame<F> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();
        match this.future.poll(cx) {
            Poll::Ready(value) => {
                if let Some(sender) = this.result_sender.take() {
                    // The Task may be gone already, in which case nobody wants the value.
                    let _ = sender.send(value);
                }
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
