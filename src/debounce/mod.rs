//! Debounced mutation scheduler.
//!
//! Wraps an async operation so that bursts of calls collapse into a single
//! delayed invocation carrying the most recent arguments. Invocations are
//! serialized: neither a fired timer nor a `flush()` starts the operation while
//! a previous invocation is still in flight.

use crate::error::SyncResult;
use crate::runtime;
use futures_util::future::{AbortHandle, Abortable, FutureExt, LocalBoxFuture, Shared};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

type Operation<A> = Box<dyn Fn(A) -> LocalBoxFuture<'static, SyncResult<()>>>;
type Invocation = Shared<LocalBoxFuture<'static, SyncResult<()>>>;

pub struct Debouncer<A: 'static> {
    inner: Rc<Inner<A>>,
}

struct Inner<A> {
    name: &'static str,
    delay: Duration,
    op: Operation<A>,
    state: RefCell<State<A>>,
}

struct State<A> {
    pending: Option<A>,
    timer: Option<AbortHandle>,
    /// Bumped whenever `pending` is replaced or consumed. A fired timer only
    /// acts if the generation it was armed with is still current.
    generation: u64,
    in_flight: Option<(u64, Invocation)>,
    invocations: u64,
}

impl<A: 'static> Debouncer<A> {
    pub fn new<F, Fut>(name: &'static str, delay: Duration, op: F) -> Self
    where
        F: Fn(A) -> Fut + 'static,
        Fut: std::future::Future<Output = SyncResult<()>> + 'static,
    {
        Self {
            inner: Rc::new(Inner {
                name,
                delay,
                op: Box::new(move |args| op(args).boxed_local()),
                state: RefCell::new(State {
                    pending: None,
                    timer: None,
                    generation: 0,
                    in_flight: None,
                    invocations: 0,
                }),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Records `args` as the pending call and (re)starts the delay.
    pub fn schedule(&self, args: A) {
        let (handle, registration) = AbortHandle::new_pair();
        let generation = {
            let mut st = self.inner.state.borrow_mut();
            if let Some(timer) = st.timer.take() {
                timer.abort();
            }
            st.pending = Some(args);
            st.generation += 1;
            st.timer = Some(handle);
            st.generation
        };

        let inner = self.inner.clone();
        runtime::spawn_local(async move {
            if Abortable::new(runtime::sleep(inner.delay), registration)
                .await
                .is_err()
            {
                return;
            }
            Inner::fire(&inner, generation).await;
        });
    }

    /// Runs the pending call now instead of waiting out the delay.
    ///
    /// Waits for any invocation already in flight first. With nothing pending
    /// and nothing in flight this resolves immediately without invoking.
    pub async fn flush(&self) -> SyncResult<()> {
        Inner::flush(&self.inner).await
    }

    /// Drops the pending call without invoking it. An invocation already in
    /// flight is not affected.
    pub fn cancel(&self) {
        let mut st = self.inner.state.borrow_mut();
        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
        st.pending = None;
        st.generation += 1;
    }

    /// Cancels the pending call only if it matches `pred`.
    pub fn cancel_if(&self, pred: impl FnOnce(&A) -> bool) -> bool {
        let matches = self.inner.state.borrow().pending.as_ref().is_some_and(pred);
        if matches {
            self.cancel();
        }
        matches
    }

    /// A call is queued or an invocation is still in flight.
    pub fn has_pending(&self) -> bool {
        let st = self.inner.state.borrow();
        st.pending.is_some() || st.in_flight.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.state.borrow().in_flight.is_some()
    }
}

impl<A: 'static> Inner<A> {
    async fn fire(inner: &Rc<Self>, generation: u64) {
        Self::wait_in_flight(inner).await;

        let args = {
            let mut st = inner.state.borrow_mut();
            if st.generation != generation {
                // Superseded by a newer schedule, a flush or a cancel.
                return;
            }
            st.timer = None;
            st.generation += 1;
            st.pending.take()
        };
        let Some(args) = args else {
            return;
        };

        // Nobody awaits a timer-fired call, so logging is the only place its
        // failure surfaces.
        if let Err(e) = Self::invoke(inner, args).await {
            tracing::warn!(channel = inner.name, error = %e, "debounced call failed");
        }
    }

    async fn flush(inner: &Rc<Self>) -> SyncResult<()> {
        Self::wait_in_flight(inner).await;

        let args = {
            let mut st = inner.state.borrow_mut();
            if let Some(timer) = st.timer.take() {
                timer.abort();
            }
            if st.pending.is_some() {
                st.generation += 1;
            }
            st.pending.take()
        };

        match args {
            Some(args) => Self::invoke(inner, args).await,
            None => Ok(()),
        }
    }

    async fn wait_in_flight(inner: &Rc<Self>) {
        loop {
            let waiting = inner
                .state
                .borrow()
                .in_flight
                .as_ref()
                .map(|(_, invocation)| invocation.clone());
            match waiting {
                // Its outcome belongs to whoever started it.
                Some(invocation) => {
                    let _ = invocation.await;
                }
                None => return,
            }
        }
    }

    fn invoke(inner: &Rc<Self>, args: A) -> Invocation {
        let id = {
            let mut st = inner.state.borrow_mut();
            st.invocations += 1;
            st.invocations
        };

        let call = (inner.op)(args);
        let weak = Rc::downgrade(inner);
        let invocation = async move {
            let result = call.await;
            if let Some(inner) = weak.upgrade() {
                let mut st = inner.state.borrow_mut();
                if st.in_flight.as_ref().map(|(current, _)| *current) == Some(id) {
                    st.in_flight = None;
                }
            }
            result
        }
        .boxed_local()
        .shared();

        inner.state.borrow_mut().in_flight = Some((id, invocation.clone()));
        // Once started, a call runs to completion even if its caller goes away.
        runtime::spawn_local(invocation.clone().map(|_| ()));
        invocation
    }
}

impl<A: 'static> Drop for Debouncer<A> {
    /// Teardown launches the pending call instead of dropping the last edits.
    fn drop(&mut self) {
        let args = {
            let mut st = self.inner.state.borrow_mut();
            if let Some(timer) = st.timer.take() {
                timer.abort();
            }
            st.generation += 1;
            st.pending.take()
        };
        let Some(args) = args else {
            return;
        };

        tracing::debug!(channel = self.inner.name, "launching pending call on teardown");
        let inner = self.inner.clone();
        runtime::spawn_local(async move {
            Inner::wait_in_flight(&inner).await;
            if let Err(e) = Inner::invoke(&inner, args).await {
                tracing::warn!(channel = inner.name, error = %e, "teardown call failed");
            }
        });
    }
}
