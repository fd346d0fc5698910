use std::fmt;

use log::Level;

/// Destination for the flag store's diagnostic messages.
///
/// The store logs nothing unless a logger is configured with
/// [crate::FlagStoreBuilder::logger].
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, args: fmt::Arguments<'_>);
}

/// Discards every message. This is the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _args: fmt::Arguments<'_>) {}
}

/// Forwards messages to the [log] facade under the `launchdarkly_flag_store` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogFacade;

impl Logger for LogFacade {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: "launchdarkly_flag_store", level, "{}", args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::{user, TestClientFactory};
    use crate::FlagStore;
    use log::{LevelFilter, Metadata, Record};
    use parking_lot::Mutex;
    use spectral::prelude::*;
    use std::sync::{Arc, Once};

    static RECORDS: Mutex<Vec<(Level, String, String)>> = parking_lot::const_mutex(Vec::new());

    struct Capture;

    impl log::Log for Capture {
        fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &Record<'_>) {
            RECORDS.lock().push((
                record.level(),
                record.target().to_owned(),
                record.args().to_string(),
            ));
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture;

    fn install_capture() {
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| {
            log::set_logger(&CAPTURE).expect("another logger was already installed");
            log::set_max_level(LevelFilter::Trace);
        });
    }

    fn captured(level: Level, fragment: &str) -> bool {
        RECORDS.lock().iter().any(|(l, target, message)| {
            *l == level && target == "launchdarkly_flag_store" && message.contains(fragment)
        })
    }

    #[test]
    fn log_facade_forwards_store_messages_to_log_crate() {
        install_capture();
        let store = FlagStore::builder(TestClientFactory::new())
            .logger(Arc::new(LogFacade))
            .build();

        let _init = store.initialize("client-a", user("facade-user"));

        assert_that!(captured(
            Level::Debug,
            "initializing flag client for context facade-user"
        ))
        .is_true();
        assert_that!(captured(Level::Error, "no tokio runtime available")).is_true();
    }

    #[test]
    fn noop_logger_emits_nothing() {
        install_capture();
        NoopLogger.log(Level::Error, format_args!("noop-logger-marker"));

        assert_that!(captured(Level::Error, "noop-logger-marker")).is_false();
    }
}
