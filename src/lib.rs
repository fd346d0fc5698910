//! A reactive store for feature flags served by a LaunchDarkly evaluation client.
//!
//! [FlagStore] owns one client connection, loads the full flag set when the client becomes ready,
//! reloads it on every change the client pushes, and exposes it through [Observable] views that
//! replay their current value to new subscribers.

mod attribute_value;
mod client;
mod contexts;
mod flag_value;
mod logger;
mod observable;
mod store;
mod test_common;
mod util;

pub use attribute_value::*;
pub use client::*;
pub use contexts::*;
pub use flag_value::*;
pub use logger::*;
pub use observable::*;
pub use store::*;
