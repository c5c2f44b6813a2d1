//! # StatusNotifierItem service
//!
//! Exports one [`org.kde.StatusNotifierItem`] object per [`Item`] and registers it with the
//! session's `StatusNotifierWatcher`. What happens when a host activates or scrolls an item is up
//! to the [`ActionHandler`] installed on it.
//!
//! [`org.kde.StatusNotifierItem`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/

pub mod dbus;

mod error;
pub use error::*;

mod item;
pub use item::*;

pub mod names;
