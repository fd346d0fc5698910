use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use itertools::Itertools;
use log::Level;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;

use crate::client::{ChangeListener, ChangeSet, ClientError, ClientFactory, FlagClient};
use crate::contexts::Context;
use crate::flag_value::{FlagSet, FlagValue};
use crate::logger::{Logger, NoopLogger};
use crate::observable::{Observable, Subject};

/// Handshake state of the store's current client connection.
#[derive(Clone, Debug, PartialEq)]
pub enum InitStatus {
    /// No connection yet, or the current connection has not finished its initial fetch.
    Initializing,
    /// The current connection delivered its initial flags.
    Ready,
    /// The current connection could not be brought up. The store will not retry.
    Failed(ClientError),
}

/// Configures and builds a [FlagStore].
pub struct FlagStoreBuilder {
    factory: Arc<dyn ClientFactory>,
    logger: Arc<dyn Logger>,
    runtime: Option<Handle>,
}

impl fmt::Debug for FlagStoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagStoreBuilder")
            .field("runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl FlagStoreBuilder {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            logger: Arc::new(NoopLogger),
            runtime: None,
        }
    }

    /// Sets where diagnostic messages go. Defaults to [NoopLogger].
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the runtime used to wait for client readiness. Without one, [FlagStore::initialize]
    /// must be called from within a tokio runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> FlagStore {
        FlagStore {
            inner: Arc::new(Inner {
                factory: self.factory,
                logger: self.logger,
                runtime: self.runtime,
                lifecycle: ReentrantMutex::new(()),
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                flags: Subject::new(Arc::new(FlagSet::new())),
                initializing: Subject::new(true),
                status: Subject::new(InitStatus::Initializing),
            }),
        }
    }
}

struct Connection {
    generation: u64,
    client: Arc<dyn FlagClient>,
    context: Context,
}

struct Inner {
    factory: Arc<dyn ClientFactory>,
    logger: Arc<dyn Logger>,
    runtime: Option<Handle>,
    // Held while a connection is swapped in and while a reaction checks that its connection is
    // still current and applies its update, so the two never interleave.
    lifecycle: ReentrantMutex<()>,
    connection: Mutex<Option<Connection>>,
    // Source of connection generations. Reactions carry the generation of the connection that
    // registered them and compare it with the one stored in `connection`.
    generation: AtomicU64,
    flags: Subject<Arc<FlagSet>>,
    initializing: Subject<bool>,
    status: Subject<InitStatus>,
}

impl Inner {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        self.logger.log(level, args);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map_or(false, |c| c.generation == generation)
    }

    /// Runs `apply` if the connection with `generation` is still the current one. Returns whether
    /// it ran.
    fn apply_if_current(&self, generation: u64, apply: impl FnOnce(&Inner)) -> bool {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_current(generation) {
            return false;
        }
        apply(self);
        true
    }

    fn replace_flags(&self, flags: FlagSet) {
        self.flags.set(Arc::new(flags));
    }

    fn mark_ready(&self) {
        if self.initializing.get() {
            self.initializing.set(false);
        }
        self.status.set(InitStatus::Ready);
    }
}

/// Keeps the flag values of one evaluation client connection and makes them observable.
///
/// A `FlagStore` is a cheap handle: clone it and pass it to every consumer that needs flags. All
/// clones share the same connection and state.
///
/// Flag state is only ever replaced by the store itself, in reaction to the client becoming ready
/// or pushing a change. Each replacement is a full snapshot read from the client and is delivered
/// once to every subscriber of [FlagStore::flags] and of every [FlagStore::watch] view.
#[derive(Clone)]
pub struct FlagStore {
    inner: Arc<Inner>,
}

impl FlagStore {
    /// Creates a store with default configuration.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        FlagStoreBuilder::new(factory).build()
    }

    pub fn builder(factory: Arc<dyn ClientFactory>) -> FlagStoreBuilder {
        FlagStoreBuilder::new(factory)
    }

    /// Connects a new client for `client_id` evaluating `context`, replacing any existing
    /// connection.
    ///
    /// This returns immediately. The store waits for the client in the background: once the
    /// client is ready its flags are loaded and [FlagStore::initializing] becomes false. If the
    /// client fails to become ready, [FlagStore::status] reports [InitStatus::Failed] and
    /// `initializing` stays true.
    ///
    /// A replaced connection is dropped, not closed; its ready and change reactions are ignored
    /// from then on.
    pub fn initialize(&self, client_id: &str, context: Context) -> Initialization {
        let inner = &self.inner;
        inner.log(
            Level::Debug,
            format_args!(
                "initializing flag client for context {}",
                context.canonical_key()
            ),
        );

        let client = inner.factory.initialize(client_id, &context);
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let replaced = {
            let _lifecycle = inner.lifecycle.lock();
            let replaced = inner
                .connection
                .lock()
                .replace(Connection {
                    generation,
                    client: client.clone(),
                    context,
                })
                .is_some();
            inner.status.set(InitStatus::Initializing);
            replaced
        };
        if replaced {
            inner.log(Level::Debug, format_args!("replacing existing client connection"));
        }

        client.on_change(change_listener(
            Arc::downgrade(inner),
            Arc::downgrade(&client),
            generation,
        ));

        match inner.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(handle) => {
                handle.spawn(wait_for_ready(Arc::downgrade(inner), client, generation));
            }
            None => {
                inner.log(
                    Level::Error,
                    format_args!("no tokio runtime available; flag client will never be ready"),
                );
                inner.apply_if_current(generation, |inner| {
                    inner.status.set(InitStatus::Failed(ClientError::NoRuntime));
                });
            }
        }

        Initialization {
            initializing: self.initializing(),
            status: self.status(),
        }
    }

    /// Switches the current client to a new context.
    ///
    /// Returns `Ok(None)` without doing anything if [FlagStore::initialize] has not been called.
    /// Otherwise resolves with whatever the client's identify resolves with. The store's flags are
    /// not set from that result; they follow the change notification the client pushes for the
    /// new context.
    pub async fn identify(&self, context: Context) -> Result<Option<FlagSet>, ClientError> {
        let current = self
            .inner
            .connection
            .lock()
            .as_ref()
            .map(|c| (c.generation, c.client.clone()));
        let Some((generation, client)) = current else {
            self.inner.log(
                Level::Debug,
                format_args!("identify called before initialize; ignoring"),
            );
            return Ok(None);
        };

        let flags = client.identify(context.clone()).await?;

        if let Some(connection) = self
            .inner
            .connection
            .lock()
            .as_mut()
            .filter(|c| c.generation == generation)
        {
            connection.context = context;
        }
        Ok(Some(flags))
    }

    /// The full flag set. Subscribers receive the current snapshot immediately and every
    /// replacement afterwards.
    pub fn flags(&self) -> Observable<Arc<FlagSet>> {
        self.inner.flags.observable()
    }

    /// True until the first connection reports ready. Never becomes true again.
    pub fn initializing(&self) -> Observable<bool> {
        self.inner.initializing.observable()
    }

    /// The current connection's handshake state.
    pub fn status(&self) -> Observable<InitStatus> {
        self.inner.status.observable()
    }

    /// A view of a single flag's value; `None` while the flag is absent.
    pub fn watch(&self, key: impl Into<String>) -> Observable<Option<FlagValue>> {
        let key = key.into();
        self.flags().map(move |flags| flags.get(&key).cloned())
    }

    /// Returns whether `key` is present with a truthy value. Absent flags are off.
    pub fn is_on(&self, key: &str) -> bool {
        self.inner
            .flags
            .get()
            .get(key)
            .map_or(false, FlagValue::is_truthy)
    }

    /// Returns the current value of `key`, if present.
    pub fn value(&self, key: &str) -> Option<FlagValue> {
        self.inner.flags.get().get(key).cloned()
    }

    /// The current client connection, if any.
    pub fn client(&self) -> Option<Arc<dyn FlagClient>> {
        self.inner
            .connection
            .lock()
            .as_ref()
            .map(|c| c.client.clone())
    }

    /// The context of the current connection: the one passed to [FlagStore::initialize], or the
    /// last one successfully passed to [FlagStore::identify].
    pub fn context(&self) -> Option<Context> {
        self.inner
            .connection
            .lock()
            .as_ref()
            .map(|c| c.context.clone())
    }
}

impl fmt::Debug for FlagStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let generation = self.inner.connection.lock().as_ref().map(|c| c.generation);
        f.debug_struct("FlagStore")
            .field("generation", &generation)
            .field("status", &self.inner.status.get())
            .field("initializing", &self.inner.initializing.get())
            .field("flags", &self.inner.flags.get().len())
            .finish()
    }
}

/// Returned by [FlagStore::initialize] so callers can wait for the connection.
pub struct Initialization {
    initializing: Observable<bool>,
    status: Observable<InitStatus>,
}

impl fmt::Debug for Initialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initialization")
            .field("status", &self.status.get())
            .field("initializing", &self.initializing.get())
            .finish()
    }
}

impl Initialization {
    pub fn initializing(&self) -> Observable<bool> {
        self.initializing.clone()
    }

    pub fn status(&self) -> Observable<InitStatus> {
        self.status.clone()
    }

    /// Resolves once flags have been loaded. Waits forever if the client never becomes ready.
    pub async fn ready(&self) {
        self.initializing.wait_for(|initializing| !*initializing).await;
    }

    /// Resolves once the connection is ready or has failed.
    pub async fn outcome(&self) -> Result<(), ClientError> {
        let status = self
            .status
            .wait_for(|status| *status != InitStatus::Initializing)
            .await;
        match status {
            InitStatus::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }
}

fn change_listener(
    store: Weak<Inner>,
    client: Weak<dyn FlagClient>,
    generation: u64,
) -> ChangeListener {
    Box::new(move |changes: &ChangeSet| {
        let (Some(store), Some(client)) = (store.upgrade(), client.upgrade()) else {
            return;
        };
        let applied = store.apply_if_current(generation, |store| {
            store.log(
                Level::Debug,
                format_args!("flags updated: {}", changes.keys().sorted().join(", ")),
            );
            // The change payload may be partial; always reload the full set.
            store.replace_flags(client.all_flags());
        });
        if !applied {
            store.log(
                Level::Debug,
                format_args!("ignoring change from replaced client connection"),
            );
        }
    })
}

async fn wait_for_ready(store: Weak<Inner>, client: Arc<dyn FlagClient>, generation: u64) {
    let result = client.wait_until_ready().await;

    let Some(store) = store.upgrade() else {
        return;
    };
    let applied = store.apply_if_current(generation, |store| match result {
        Ok(()) => {
            store.replace_flags(client.all_flags());
            store.mark_ready();
            store.log(Level::Debug, format_args!("flag client ready"));
        }
        Err(err) => {
            store.log(
                Level::Error,
                format_args!("flag client failed to initialize: {}", err),
            );
            store.status.set(InitStatus::Failed(err));
        }
    });
    if !applied {
        store.log(
            Level::Debug,
            format_args!("replaced client connection became ready; ignoring"),
        );
    }
}
