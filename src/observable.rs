use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle for a registered subscriber. Dropping it, or calling
/// [Subscription::unsubscribe], stops further deliveries.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stops deliveries to the subscriber.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

trait Source<T>: Send + Sync {
    fn get(&self) -> T;
    fn subscribe(&self, callback: Callback<T>) -> Subscription;
}

struct SubjectState<T> {
    value: T,
    next_id: u64,
    subscribers: Vec<(u64, Callback<T>)>,
}

struct SubjectInner<T> {
    state: Mutex<SubjectState<T>>,
    // Held for the whole of a set or a replay so that subscribers see values in set order.
    dispatch: ReentrantMutex<()>,
}

/// A writable value holder that notifies subscribers on every [Subject::set].
///
/// Consumers should be handed the read-only [Observable] returned by [Subject::observable].
pub struct Subject<T> {
    inner: Arc<SubjectInner<T>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Subject<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SubjectInner {
                state: Mutex::new(SubjectState {
                    value,
                    next_id: 0,
                    subscribers: Vec::new(),
                }),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    /// Replaces the current value and delivers it to every subscriber, in subscription order.
    ///
    /// Every call produces exactly one delivery per subscriber, even when the value is unchanged.
    pub fn set(&self, value: T) {
        let _dispatch = self.inner.dispatch.lock();
        let subscribers: Vec<Callback<T>> = {
            let mut state = self.inner.state.lock();
            state.value = value.clone();
            state.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in subscribers {
            callback(&value);
        }
    }

    pub fn get(&self) -> T {
        self.inner.state.lock().value.clone()
    }

    /// Returns a read-only view of this subject.
    pub fn observable(&self) -> Observable<T> {
        Observable {
            source: Arc::new(self.clone()),
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }
}

impl<T: Clone + Send + Sync + 'static> Source<T> for Subject<T> {
    fn get(&self) -> T {
        Subject::get(self)
    }

    fn subscribe(&self, callback: Callback<T>) -> Subscription {
        let _dispatch = self.inner.dispatch.lock();
        let (id, current) = {
            let mut state = self.inner.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push((id, callback.clone()));
            (id, state.value.clone())
        };
        callback(&current);

        let weak: Weak<SubjectInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().subscribers.retain(|(sid, _)| *sid != id);
            }
        })
    }
}

struct Derived<S, T> {
    parent: Observable<S>,
    project: Arc<dyn Fn(&S) -> T + Send + Sync>,
}

impl<S, T> Source<T> for Derived<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> T {
        (self.project)(&self.parent.get())
    }

    fn subscribe(&self, callback: Callback<T>) -> Subscription {
        let project = self.project.clone();
        self.parent
            .source
            .subscribe(Arc::new(move |value: &S| callback(&project(value))))
    }
}

/// A read-only value that can be read synchronously and subscribed to.
///
/// Subscribing delivers the current value immediately, on the subscribing thread, before any
/// later update.
pub struct Observable<T> {
    source: Arc<dyn Source<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Returns the current value.
    pub fn get(&self) -> T {
        self.source.get()
    }

    /// Registers `callback`, calls it with the current value, and then calls it again on every
    /// update until the returned [Subscription] is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.source.subscribe(Arc::new(callback))
    }

    /// Derives an observable whose value is `project` applied to this one's.
    ///
    /// The projection is recomputed for every upstream update, so each upstream emission produces
    /// exactly one downstream emission.
    pub fn map<U, F>(&self, project: F) -> Observable<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        Observable {
            source: Arc::new(Derived {
                parent: self.clone(),
                project: Arc::new(project),
            }),
        }
    }

    /// Returns a stream of the current value followed by every update.
    ///
    /// The stream is unbounded so that no update is dropped or merged, however slowly it is read.
    pub fn stream(&self) -> ObservableStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |value: &T| {
            let _ = tx.send(value.clone());
        });
        ObservableStream {
            rx,
            _subscription: subscription,
        }
    }

    /// Waits until the value satisfies `predicate` and returns that value. Resolves immediately if
    /// the current value already does.
    pub async fn wait_for<P>(&self, predicate: P) -> T
    where
        P: Fn(&T) -> bool,
    {
        let mut stream = self.stream();
        loop {
            match stream.next().await {
                Some(value) if predicate(&value) => return value,
                Some(_) => continue,
                // The sender lives in our own subscription, so the channel cannot close first.
                None => return self.get(),
            }
        }
    }
}

/// Asynchronous view of an [Observable]. See [Observable::stream].
pub struct ObservableStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
    _subscription: Subscription,
}

impl<T> ObservableStream<T> {
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns the next value if one is already queued.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}
