use crate::Context;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

pin_project! {
    /// A future that attaches its [`Context`] for the duration of each poll.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        lmt_cx: Context,
    }
}

impl<T: std::future::Future> std::future::Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.lmt_cx.clone().attach();

        this.inner.poll(task_cx)
    }
}

/// Extension trait allowing futures to carry a [`Context`].
pub trait FutureContextExt: Sized {
    /// Attach `lmt_cx` whenever this future is polled.
    fn with_context(self, lmt_cx: Context) -> WithContext<Self> {
        WithContext {
            inner: self,
            lmt_cx,
        }
    }

    /// Attach a clone of the caller's current context whenever this future
    /// is polled.
    fn with_current_context(self) -> WithContext<Self> {
        let lmt_cx = Context::current();
        self.with_context(lmt_cx)
    }
}

impl<T: std::future::Future> FutureContextExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Flow(&'static str);

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_tasks_see_only_their_own_context() {
        let mut handles = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let cx = Context::new().with_value(Flow(name));
            handles.push(tokio::spawn(
                async move {
                    for _ in 0..10 {
                        tokio::task::yield_now().await;
                        let seen = Context::map_current(|cx| cx.get::<Flow>().map(|f| f.0));
                        assert_eq!(seen, Some(name));
                    }
                }
                .with_context(cx),
            ));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(Context::current().get::<Flow>(), None);
    }
}
