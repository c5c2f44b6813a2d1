//! # XEmbed system tray manager
//!
//! Claims the `_NET_SYSTEM_TRAY_S0` selection, embeds every window that asks to be docked into an
//! off-screen container and keeps it unmapped. An [`Icon`] only becomes visible for the duration
//! of a capture or a synthesized click, so a legacy tray icon can be driven and rendered elsewhere
//! while never showing up on the desktop.
//!
//! The X11 requests go through the [`Backend`] trait. [`X11Backend`] is the real implementation
//! on top of [x11rb](https://docs.rs/x11rb); [`Manager`] owns it together with the event loop.

mod atoms;
pub use atoms::*;

mod backend;
pub use backend::*;

mod error;
pub use error::*;

mod icon;
pub use icon::*;

mod manager;
pub use manager::*;

mod tray;
pub use tray::*;
