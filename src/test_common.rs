#![cfg(test)]

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use async_trait::async_trait;
use log::Level;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    ChangeListener, ChangeSet, ClientError, ClientFactory, Context, ContextBuilder, FlagClient,
    FlagSet, Logger,
};

pub fn user(key: &str) -> Context {
    ContextBuilder::new(key).build().unwrap()
}

/// An in-memory evaluation client whose readiness and updates are driven by the test.
pub struct TestClient {
    client_id: String,
    context: Mutex<Context>,
    flags: Mutex<FlagSet>,
    ready: Mutex<Option<Result<(), ClientError>>>,
    ready_notify: Notify,
    listeners: Mutex<Vec<ChangeListener>>,
    next_identify: Mutex<Option<Result<FlagSet, ClientError>>>,
    all_flags_calls: AtomicUsize,
}

impl TestClient {
    fn new(client_id: &str, context: Context) -> Self {
        Self {
            client_id: client_id.to_owned(),
            context: Mutex::new(context),
            flags: Mutex::new(FlagSet::new()),
            ready: Mutex::new(None),
            ready_notify: Notify::new(),
            listeners: Mutex::new(Vec::new()),
            next_identify: Mutex::new(None),
            all_flags_calls: AtomicUsize::new(0),
        }
    }

    pub fn client_id(&self) -> String {
        self.client_id.clone()
    }

    pub fn context(&self) -> Context {
        self.context.lock().clone()
    }

    /// Completes the initial fetch with `flags`.
    pub fn make_ready(&self, flags: FlagSet) {
        *self.flags.lock() = flags;
        self.finish_handshake(Ok(()));
    }

    /// Fails the initial fetch.
    pub fn fail(&self, error: ClientError) {
        self.finish_handshake(Err(error));
    }

    fn finish_handshake(&self, outcome: Result<(), ClientError>) {
        *self.ready.lock() = Some(outcome);
        self.ready_notify.notify_waiters();
    }

    /// Simulates a server push: the flags become `flags` and every listener receives `changes`.
    pub fn push_change(&self, flags: FlagSet, changes: ChangeSet) {
        *self.flags.lock() = flags;
        for listener in self.listeners.lock().iter() {
            listener(&changes);
        }
    }

    /// Sets the result of the next identify call.
    pub fn respond_to_identify(&self, response: Result<FlagSet, ClientError>) {
        *self.next_identify.lock() = Some(response);
    }

    pub fn all_flags_calls(&self) -> usize {
        self.all_flags_calls.load(Ordering::SeqCst)
    }

    /// Reads the flags without counting as an `all_flags` call.
    pub fn all_flags_snapshot(&self) -> FlagSet {
        self.flags.lock().clone()
    }
}

#[async_trait]
impl FlagClient for TestClient {
    async fn wait_until_ready(&self) -> Result<(), ClientError> {
        loop {
            let notified = self.ready_notify.notified();
            let outcome = self.ready.lock().clone();
            if let Some(outcome) = outcome {
                return outcome;
            }
            notified.await;
        }
    }

    fn all_flags(&self) -> FlagSet {
        self.all_flags_calls.fetch_add(1, Ordering::SeqCst);
        self.flags.lock().clone()
    }

    fn on_change(&self, listener: ChangeListener) {
        self.listeners.lock().push(listener);
    }

    async fn identify(&self, context: Context) -> Result<FlagSet, ClientError> {
        let response = self.next_identify.lock().take();
        match response {
            Some(Ok(flags)) => {
                *self.context.lock() = context;
                self.push_change(flags.clone(), ChangeSet::new());
                Ok(flags)
            }
            Some(Err(err)) => Err(err),
            None => {
                *self.context.lock() = context;
                Ok(self.all_flags_snapshot())
            }
        }
    }
}

#[derive(Default)]
pub struct TestClientFactory {
    clients: Mutex<Vec<Arc<TestClient>>>,
    stall: Mutex<Option<(Arc<Barrier>, Arc<Barrier>)>>,
}

impl TestClientFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_client(&self) -> Arc<TestClient> {
        self.clients
            .lock()
            .last()
            .cloned()
            .expect("no client was initialized")
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Clients in the order the factory finished creating them.
    pub fn clients(&self) -> Vec<Arc<TestClient>> {
        self.clients.lock().clone()
    }

    /// Makes the next `initialize` wait on `entered` once it has started, and then on `release`
    /// before it creates its client.
    pub fn stall_next(&self, entered: Arc<Barrier>, release: Arc<Barrier>) {
        *self.stall.lock() = Some((entered, release));
    }
}

impl ClientFactory for TestClientFactory {
    fn initialize(&self, client_id: &str, context: &Context) -> Arc<dyn FlagClient> {
        let stall = self.stall.lock().take();
        if let Some((entered, release)) = stall {
            entered.wait();
            release.wait();
        }
        let client = Arc::new(TestClient::new(client_id, context.clone()));
        self.clients.lock().push(client.clone());
        client
    }
}

#[derive(Default)]
pub struct RecordingLogger {
    messages: Mutex<Vec<(Level, String)>>,
}

impl RecordingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, level: Level, fragment: &str) -> bool {
        self.messages
            .lock()
            .iter()
            .any(|(l, message)| *l == level && message.contains(fragment))
    }
}

impl Logger for RecordingLogger {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        self.messages.lock().push((level, args.to_string()));
    }
}
