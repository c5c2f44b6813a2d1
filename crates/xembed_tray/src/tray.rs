use crate::*;

use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use x11rb::protocol::xproto::{Atom, ClientMessageEvent, Window};

/// Where containers are created, far outside of any real screen.
const CONTAINER_POSITION: (i16, i16) = (-10000, -10000);

const XEMBED_VERSION: u32 = 0;
const XEMBED_MAPPED: u32 = 1 << 0;
const XEMBED_EMBEDDED_NOTIFY: u32 = 0;

const SYSTEM_TRAY_REQUEST_DOCK: u32 = 0;

/// Lifecycle notifications sent by the [`Manager`].
#[derive(Debug, Clone)]
pub enum TrayEvent {
    IconAdded(Arc<Icon>),
    IconRemoved(Arc<Icon>),
    TitleChanged(Arc<Icon>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Width and height forced onto every docked window.
    pub icon_size: u16,
    /// Capacity of the [`TrayEvent`] queue. Once it is full, the manager stops processing X events
    /// until the receiver catches up.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig { icon_size: 32, event_capacity: 64 }
    }
}

/// The embedding state machine and the table of docked icons, keyed by dock window.
#[derive(Debug)]
pub struct Tray {
    backend: Arc<dyn Backend>,
    atoms: Atoms,
    icon_size: u16,
    icons: HashMap<Window, Arc<Icon>>,
    events: mpsc::Sender<TrayEvent>,
}

impl Tray {
    pub fn new(backend: Arc<dyn Backend>, atoms: Atoms, config: &ManagerConfig, events: mpsc::Sender<TrayEvent>) -> Self {
        Tray { backend, atoms, icon_size: config.icon_size, icons: HashMap::new(), events }
    }

    pub fn icon(&self, window: Window) -> Option<&Arc<Icon>> {
        self.icons.get(&window)
    }

    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }

    /// Embed `window` into a hidden container and start tracking it.
    ///
    /// Requests for a window that is already docked are ignored. If any step fails the request is
    /// dropped and nothing is tracked.
    pub fn dock(&mut self, window: Window) -> Result<()> {
        if self.icons.contains_key(&window) {
            log::debug!("Ignoring repeated dock request for 0x{:x}", window);
            return Ok(());
        }
        let container = self.embed(window)?;
        let icon = Arc::new(Icon::new(self.backend.clone(), self.atoms, window, container));
        self.icons.insert(window, icon.clone());
        log::info!("Docked tray icon 0x{:x} into container 0x{:x}", window, container);
        self.notify(TrayEvent::IconAdded(icon));
        Ok(())
    }

    /// Handle a client message sent to the manager window.
    ///
    /// Only `_NET_SYSTEM_TRAY_OPCODE` messages with the `SYSTEM_TRAY_REQUEST_DOCK` sub-code do
    /// anything: they dock the window named in the third data word. Failures are logged.
    pub fn client_message(&mut self, event: &ClientMessageEvent) {
        if event.type_ != self.atoms._NET_SYSTEM_TRAY_OPCODE || event.format != 32 {
            return;
        }
        let data = event.data.as_data32();
        if data[1] != SYSTEM_TRAY_REQUEST_DOCK {
            log::trace!("Ignoring system tray opcode {}", data[1]);
            return;
        }
        let window = data[2];
        if let Err(e) = self.dock(window) {
            log::warn!("Failed to dock window 0x{:x}: {}", window, e);
        }
    }

    /// Forget a dock window that was destroyed by its application.
    pub fn remove(&mut self, window: Window) {
        let Some(icon) = self.icons.remove(&window) else {
            return;
        };
        log::info!("Tray icon 0x{:x} went away", window);
        if let Err(e) = self.backend.destroy_window(icon.container()) {
            log::debug!("Failed to destroy container 0x{:x}: {}", icon.container(), e);
        }
        self.notify(TrayEvent::IconRemoved(icon));
    }

    /// React to a property change on a dock window.
    pub fn property_changed(&mut self, window: Window, property: Atom) {
        if !self.atoms.is_title(property) {
            return;
        }
        if let Some(icon) = self.icons.get(&window) {
            self.notify(TrayEvent::TitleChanged(icon.clone()));
        }
    }

    /// Run the embedding sequence, destroying the container again if any step fails.
    fn embed(&self, window: Window) -> Result<Window> {
        let (x, y) = CONTAINER_POSITION;
        let container = self.backend.create_container(x, y, self.icon_size, self.icon_size)?;
        match self.embed_into(window, container) {
            Ok(()) => Ok(container),
            Err(e) => {
                if let Err(err) = self.backend.destroy_window(container) {
                    log::debug!("Failed to clean up container 0x{:x}: {}", container, err);
                }
                Err(e)
            }
        }
    }

    fn embed_into(&self, window: Window, container: Window) -> Result<()> {
        self.backend.reparent_window(window, container)?;
        self.backend.resize_window(window, self.icon_size, self.icon_size)?;
        self.backend.watch_window(window)?;
        self.backend.add_to_save_set(window)?;
        self.backend.change_property32(
            window,
            self.atoms._XEMBED_INFO,
            self.atoms._XEMBED_INFO,
            &[XEMBED_VERSION, XEMBED_MAPPED],
        )?;
        self.backend.send_client_message(
            window,
            self.atoms._XEMBED,
            [x11rb::CURRENT_TIME, XEMBED_EMBEDDED_NOTIFY, 0, container, XEMBED_VERSION],
        )
    }

    fn notify(&self, event: TrayEvent) {
        if self.events.blocking_send(event).is_err() {
            log::debug!("Tray event receiver is gone, dropping event");
        }
    }
}
