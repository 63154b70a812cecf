//! Demand-activated observable values.
//!
//! A [`View`] keeps track of a value which changes over time and notifies
//! subscribers of changes, with one twist over a plain watchable: the
//! producer that computes the value only runs while the view has at least
//! one subscriber. The first [`View::subscribe`] activates the producer,
//! dropping the last [`Subscription`] tears it down again, and a later
//! subscribe starts over from [`Status::Pending`]. Nothing is fetched,
//! retained or recomputed while nobody is listening.
//!
//! Only the most recent status is available to any subscriber; a slow
//! subscriber misses intermediate statuses, never the final one.

use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, Weak},
    task::{Context, Poll, Waker},
};

use crate::{error::FetchError, util::AbortingJoinHandle};

/// Status of a [`View`], as observed by subscribers.
#[derive(Debug, Clone)]
pub enum Status<T> {
    /// No value has been produced yet in this activation.
    Pending,
    /// The most recently produced value.
    Ready(T),
    /// The most recent production cycle failed.
    ///
    /// Errors are not terminal: the producer keeps running and the next
    /// successful cycle publishes `Ready` again.
    Error(Arc<FetchError>),
}

impl<T> Status<T> {
    /// Returns the value if the status is `Ready`.
    pub fn ready(&self) -> Option<&T> {
        match self {
            Status::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Consuming variant of [`Status::ready`].
    pub fn into_ready(self) -> Option<T> {
        match self {
            Status::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the error if the status is `Error`.
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Status::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Whether no value has been produced yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, Status::Pending)
    }
}

/// Resources held by an active producer.
///
/// Dropping the activation aborts the owned task. This is the only
/// teardown path, so the poll timer and the signal receiver owned by the
/// task can never outlive the activation, no matter where in its cycle
/// the last subscriber detaches.
#[derive(Debug)]
pub struct Activation {
    _task: AbortingJoinHandle<()>,
}

impl Activation {
    /// Spawns `fut` as the producer task of this activation.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(fut: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            _task: tokio::spawn(fut).into(),
        }
    }
}

type Producer<T> = dyn Fn(Publisher<T>) -> Activation + Send + Sync + 'static;

/// A subscribable, demand-activated value.
///
/// Created with [`View::new`] from a producer; cloning shares the same
/// underlying state and subscriber count.
pub struct View<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for View<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for View<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View").finish_non_exhaustive()
    }
}

impl<T> View<T> {
    /// Creates a view driven by `producer`.
    ///
    /// The producer is invoked on the subscribing thread whenever the
    /// subscriber count transitions from zero to one. It receives a
    /// [`Publisher`] valid for that activation and returns the
    /// [`Activation`] owning whatever it started; the activation is
    /// dropped when the count returns to zero. The producer is called once
    /// per activation, so it must be repeatable.
    ///
    /// The producer must not subscribe to the view it produces.
    pub fn new(producer: impl Fn(Publisher<T>) -> Activation + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    status: Status::Pending,
                    epoch: 1,
                    generation: 0,
                    subscribers: 0,
                    activation: None,
                    producer: Box::new(producer),
                }),
                wakers: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Subscribes, activating the producer if this is the first subscriber.
    ///
    /// The subscription observes the current status immediately (via
    /// [`Subscription::get`]) and every status published while it exists,
    /// in publish order, through [`Subscription::updated`] or the stream.
    pub fn subscribe(&self) -> Subscription<T> {
        let mut inner = self.shared.inner.lock().expect("poisoned");
        let epoch = inner.epoch;
        inner.subscribers += 1;
        if inner.subscribers == 1 {
            inner.generation += 1;
            debug_assert!(inner.activation.is_none());
            let publisher = Publisher {
                shared: Arc::downgrade(&self.shared),
                generation: inner.generation,
            };
            let activation = (inner.producer)(publisher);
            inner.activation = Some(activation);
        }
        drop(inner);
        Subscription {
            shared: self.shared.clone(),
            epoch,
        }
    }
}

/// Handle a producer uses to publish status changes.
///
/// Tied to one activation: once that activation is torn down, publishes
/// through this handle are silently dropped, so a task that is aborted
/// mid-cycle cannot corrupt a later activation.
pub struct Publisher<T> {
    shared: Weak<Shared<T>>,
    generation: u64,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            generation: self.generation,
        }
    }
}

impl<T> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl<T: PartialEq> Publisher<T> {
    /// Publishes a new status unless nothing changed.
    ///
    /// Two `Ready` statuses are compared structurally and an unchanged
    /// value is not republished; `Pending` never republishes over
    /// `Pending`; `Error` always publishes, since every failed cycle is
    /// observable. Returns whether subscribers were notified.
    pub fn publish(&self, status: Status<T>) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut inner = shared.inner.lock().expect("poisoned");
        if inner.generation != self.generation || inner.activation.is_none() {
            return false;
        }
        let changed = match (&inner.status, &status) {
            (Status::Ready(current), Status::Ready(next)) => current != next,
            (Status::Pending, Status::Pending) => false,
            _ => true,
        };
        if !changed {
            return false;
        }
        inner.status = status;
        inner.epoch += 1;
        drop(inner);
        shared.wake();
        true
    }

    /// Publishes `Status::Ready(value)`.
    pub fn publish_value(&self, value: T) -> bool {
        self.publish(Status::Ready(value))
    }

    /// Publishes `Status::Error(err)`.
    pub fn publish_error(&self, err: FetchError) -> bool {
        self.publish(Status::Error(Arc::new(err)))
    }
}

/// An active subscription to a [`View`].
///
/// Holding any subscription keeps the view's producer running; dropping
/// the last one aborts it and resets the view to pending, so a later
/// subscribe never observes a stale value it has no way to validate.
pub struct Subscription<T> {
    shared: Arc<Shared<T>>,
    epoch: u64,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl<T: Clone> Subscription<T> {
    /// Returns the current status without consuming an update.
    pub fn get(&self) -> Status<T> {
        self.shared.inner.lock().expect("poisoned").status.clone()
    }

    /// Polls for a status published after the last one this subscription
    /// observed.
    pub fn poll_updated(&mut self, cx: &mut Context<'_>) -> Poll<Status<T>> {
        if let Some(update) = self.check_epoch() {
            return Poll::Ready(update);
        }
        self.shared
            .wakers
            .lock()
            .expect("poisoned")
            .push_back(cx.waker().clone());
        // A publish may have raced the waker registration.
        if let Some(update) = self.check_epoch() {
            return Poll::Ready(update);
        }
        Poll::Pending
    }

    fn check_epoch(&mut self) -> Option<Status<T>> {
        let inner = self.shared.inner.lock().expect("poisoned");
        if self.epoch < inner.epoch {
            self.epoch = inner.epoch;
            Some(inner.status.clone())
        } else {
            None
        }
    }

    /// Waits for the next status change.
    ///
    /// # Cancel Safety
    ///
    /// The returned future is cancel-safe: dropping it before completion
    /// never loses the most recent status, only intermediate ones.
    pub fn updated(&mut self) -> Updated<'_, T> {
        Updated { subscription: self }
    }

    /// Converts into a stream of statuses.
    ///
    /// The first item is the current status, so the stream can be used to
    /// operate on the most recent state immediately; every further item is
    /// a published change.
    pub fn into_stream(self) -> StatusStream<T> {
        let initial = self.get();
        StatusStream {
            initial: Some(initial),
            subscription: self,
        }
    }
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        let mut inner = self.shared.inner.lock().expect("poisoned");
        inner.subscribers += 1;
        drop(inner);
        Self {
            shared: self.shared.clone(),
            epoch: self.epoch,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().expect("poisoned");
        inner.subscribers -= 1;
        if inner.subscribers > 0 {
            return;
        }
        let activation = inner.activation.take();
        // Invalidate outstanding publishers before the abort lands, in
        // case the task is mid-publish on another thread.
        inner.generation += 1;
        inner.status = Status::Pending;
        inner.epoch += 1;
        drop(inner);
        drop(activation);
    }
}

/// Future returned by [`Subscription::updated`].
#[derive(Debug)]
pub struct Updated<'a, T> {
    subscription: &'a mut Subscription<T>,
}

impl<T: Clone> Future for Updated<'_, T> {
    type Output = Status<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().subscription.poll_updated(cx)
    }
}

/// Stream of statuses for a [`Subscription`].
///
/// See [`Subscription::into_stream`]. The stream never ends; drop it to
/// unsubscribe.
#[derive(Debug)]
pub struct StatusStream<T> {
    initial: Option<Status<T>>,
    subscription: Subscription<T>,
}

impl<T: Clone + Unpin> futures_lite::Stream for StatusStream<T> {
    type Item = Status<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(initial) = this.initial.take() {
            return Poll::Ready(Some(initial));
        }
        this.subscription.poll_updated(cx).map(Some)
    }
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    wakers: Mutex<VecDeque<Waker>>,
}

struct Inner<T> {
    status: Status<T>,
    /// Bumped on every published change; subscriptions compare against it.
    epoch: u64,
    /// Bumped on every activation and deactivation; a publish from a stale
    /// generation is dropped.
    generation: u64,
    subscribers: usize,
    activation: Option<Activation>,
    producer: Box<Producer<T>>,
}

impl<T> Shared<T> {
    fn wake(&self) {
        for waker in self.wakers.lock().expect("poisoned").drain(..) {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use futures_lite::StreamExt;

    use super::*;

    enum Cmd {
        Value(u32),
        Error,
    }

    /// A view whose producer replays the commands sent on a channel,
    /// counting the publishes that actually went through.
    ///
    /// Only the first activation is driven by the channel; a reactivation
    /// gets an idle producer, which is all the lifecycle tests need.
    fn script_view() -> (
        View<u32>,
        tokio::sync::mpsc::UnboundedSender<Cmd>,
        Arc<AtomicUsize>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(Some(rx)));
        let published = Arc::new(AtomicUsize::new(0));
        let count = published.clone();
        let view = View::new(move |publisher| {
            let Some(mut rx) = rx.lock().unwrap().take() else {
                return Activation::spawn(async move {});
            };
            let count = count.clone();
            Activation::spawn(async move {
                while let Some(cmd) = rx.recv().await {
                    let sent = match cmd {
                        Cmd::Value(value) => publisher.publish_value(value),
                        Cmd::Error => publisher.publish_error(FetchError::NotFound),
                    };
                    count.fetch_add(sent as usize, Ordering::SeqCst);
                }
            })
        });
        (view, tx, published)
    }

    #[tokio::test]
    async fn producer_runs_only_while_subscribed() {
        let activations = Arc::new(AtomicUsize::new(0));
        let count = activations.clone();
        let view = View::new(move |publisher| {
            count.fetch_add(1, Ordering::SeqCst);
            Activation::spawn(async move {
                publisher.publish_value(1u32);
            })
        });
        assert_eq!(activations.load(Ordering::SeqCst), 0);

        let mut sub = view.subscribe();
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert!(matches!(sub.updated().await, Status::Ready(1)));

        drop(sub);
        let mut sub = view.subscribe();
        assert_eq!(activations.load(Ordering::SeqCst), 2);
        assert!(matches!(sub.updated().await, Status::Ready(1)));
    }

    #[tokio::test]
    async fn additional_subscribers_share_one_activation() {
        let (view, tx, _) = script_view();
        let mut first = view.subscribe();
        tx.send(Cmd::Value(7)).unwrap();
        assert!(matches!(first.updated().await, Status::Ready(7)));

        // A late subscriber sees the current status without a new publish.
        let second = view.subscribe();
        assert!(matches!(second.get(), Status::Ready(7)));

        // Cloning counts as a subscriber too.
        let mut third = second.clone();
        drop(first);
        drop(second);
        // Still active: the remaining clone keeps the producer alive.
        tx.send(Cmd::Value(8)).unwrap();
        assert!(matches!(third.updated().await, Status::Ready(8)));
    }

    #[tokio::test]
    async fn resets_to_pending_on_full_detach() {
        let (view, tx, _) = script_view();
        let mut sub = view.subscribe();
        tx.send(Cmd::Value(3)).unwrap();
        assert!(matches!(sub.updated().await, Status::Ready(3)));
        drop(sub);
        // The next subscription starts from scratch.
        let sub = view.subscribe();
        assert!(sub.get().is_pending());
    }

    #[tokio::test]
    async fn stream_yields_current_status_then_changes() {
        let (view, tx, _) = script_view();
        let sub = view.subscribe();
        let mut stream = sub.into_stream();
        assert!(stream.next().await.unwrap().is_pending());
        tx.send(Cmd::Value(5)).unwrap();
        assert!(matches!(stream.next().await.unwrap(), Status::Ready(5)));
        tx.send(Cmd::Value(6)).unwrap();
        assert!(matches!(stream.next().await.unwrap(), Status::Ready(6)));
    }

    #[tokio::test]
    async fn publish_is_gated_on_change_but_errors_repeat() {
        let (view, tx, published) = script_view();
        let mut sub = view.subscribe();

        tx.send(Cmd::Error).unwrap();
        assert!(matches!(sub.updated().await, Status::Error(_)));
        // A second failing cycle is observable even though nothing changed.
        tx.send(Cmd::Error).unwrap();
        assert!(matches!(sub.updated().await, Status::Error(_)));

        tx.send(Cmd::Value(1)).unwrap();
        assert!(matches!(sub.updated().await, Status::Ready(1)));
        // An unchanged value is swallowed; the next update is already 2.
        tx.send(Cmd::Value(1)).unwrap();
        tx.send(Cmd::Value(2)).unwrap();
        assert!(matches!(sub.updated().await, Status::Ready(2)));

        assert_eq!(published.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stale_publisher_is_ignored_after_reactivation() {
        let slot: Arc<Mutex<Option<Publisher<u32>>>> = Arc::new(Mutex::new(None));
        let captured = slot.clone();
        let view = View::new(move |publisher| {
            *captured.lock().unwrap() = Some(publisher);
            Activation::spawn(async move {})
        });

        let sub = view.subscribe();
        let stale = slot.lock().unwrap().take().unwrap();
        drop(sub);

        // Publishing through the handle of a torn-down activation is a no-op.
        assert!(!stale.publish_value(9));

        let sub = view.subscribe();
        assert!(sub.get().is_pending());
        let fresh = slot.lock().unwrap().take().unwrap();
        assert!(fresh.publish_value(10));
        assert!(matches!(sub.get(), Status::Ready(10)));
        assert!(!stale.publish_value(11));
        assert!(matches!(sub.get(), Status::Ready(10)));
    }

    #[tokio::test]
    async fn teardown_aborts_the_producer_task() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let count = ticks.clone();
        let view = View::new(move |publisher| {
            let count = count.clone();
            Activation::spawn(async move {
                let mut n = 0u32;
                loop {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    n += 1;
                    count.fetch_add(1, Ordering::SeqCst);
                    publisher.publish_value(n);
                }
            })
        });
        let mut sub = view.subscribe();
        sub.updated().await;
        drop(sub);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen, "task kept running");
    }
}
