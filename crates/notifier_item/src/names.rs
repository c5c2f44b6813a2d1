//! Well-known names and paths of the StatusNotifierItem protocol.

use std::sync::atomic::{AtomicU32, Ordering};

pub const ITEM_OBJECT: &str = "/StatusNotifierItem";
pub const ITEM_INTERFACE: &str = "org.kde.StatusNotifierItem";

/// Hands out `org.kde.StatusNotifierItem-{pid}-{n}` bus names, as recommended by the
/// StatusNotifierItem specification for processes exporting more than one item.
#[derive(Debug)]
pub struct ServiceNames {
    pid: u32,
    counter: AtomicU32,
}

impl ServiceNames {
    pub fn new() -> Self {
        Self::with_pid(std::process::id())
    }

    pub fn with_pid(pid: u32) -> Self {
        ServiceNames { pid, counter: AtomicU32::new(0) }
    }

    /// The next unused name.
    pub fn allocate(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", ITEM_INTERFACE, self.pid, n)
    }
}

impl Default for ServiceNames {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_allocate() {
        let names = ServiceNames::with_pid(4242);
        assert_eq!(names.allocate(), "org.kde.StatusNotifierItem-4242-0");
        assert_eq!(names.allocate(), "org.kde.StatusNotifierItem-4242-1");
        assert!(zbus::names::WellKnownName::try_from(names.allocate()).is_ok());
    }
}
