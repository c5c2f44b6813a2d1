use clap::Parser;
use std::time::Duration;
use xembed_tray::ManagerConfig;

use crate::daemon::BridgeConfig;

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq, Eq)]
pub struct Opt {
    pub log_debug: bool,
    pub manager: ManagerConfig,
    pub bridge: BridgeConfig,
}

#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version, about)]
struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug")]
    log_debug: bool,

    /// How often docked icons are checked for changes, in milliseconds.
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: u64,

    /// Size in pixels that docked windows are resized to.
    #[arg(long, default_value_t = 32, value_parser = clap::value_parser!(u16).range(1..))]
    icon_size: u16,

    /// Number of tray events that may be queued before the X event loop waits.
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..))]
    event_queue: u32,

    /// Category reported by every StatusNotifierItem.
    #[arg(long, default_value = "ApplicationStatus")]
    category: String,
}

impl Opt {
    pub fn from_env() -> Self {
        RawOpt::parse().into()
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { log_debug, poll_interval, icon_size, event_queue, category } = other;
        Opt {
            log_debug,
            manager: ManagerConfig { icon_size, event_capacity: event_queue as usize },
            bridge: BridgeConfig { poll_interval: Duration::from_millis(poll_interval), category },
        }
    }
}
