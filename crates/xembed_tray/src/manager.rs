use crate::*;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use x11rb::{
    errors::ConnectionError,
    protocol::{xproto::Window, Event},
};

/// Owner of the system tray selection and of the X event loop.
#[derive(Debug)]
pub struct Manager {
    backend: Arc<X11Backend>,
    window: Window,
    tray: Tray,
}

impl Manager {
    /// Connect to the X server and become the system tray.
    ///
    /// Fails if another client already owns `_NET_SYSTEM_TRAY_S0`. Lifecycle notifications are
    /// delivered through the returned receiver while [`Manager::run`] is running.
    pub fn create(config: &ManagerConfig) -> Result<(Self, mpsc::Receiver<TrayEvent>)> {
        let backend = Arc::new(X11Backend::new()?);
        let atoms = *backend.atoms();

        let owner = backend.selection_owner(atoms._NET_SYSTEM_TRAY_S0)?;
        if owner != x11rb::NONE {
            return Err(Error::TrayAlreadyOwned(owner));
        }

        let window = backend.create_selection_window()?;
        backend.set_selection_owner(window, atoms._NET_SYSTEM_TRAY_S0)?;
        backend.broadcast_manager(window)?;
        log::info!("Acquired the system tray selection with window 0x{:x}", window);

        let (send, recv) = mpsc::channel(config.event_capacity);
        let tray = Tray::new(backend.clone(), atoms, config, send);
        Ok((Manager { backend, window, tray }, recv))
    }

    /// The window owning the tray selection.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Process X events on the calling thread until `cancel` fires or the server closes the
    /// connection.
    pub fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let waker = {
            let backend = self.backend.clone();
            let cancel = cancel.clone();
            let window = self.window;
            std::thread::Builder::new()
                .name("tray-waker".to_string())
                .spawn(move || {
                    futures::executor::block_on(cancel.cancelled());
                    if let Err(e) = backend.wake(window) {
                        log::debug!("Failed to wake the tray event loop: {}", e);
                    }
                })?
        };

        let result = self.event_loop(&cancel);
        // a lost connection shuts down everything else sharing the token too
        cancel.cancel();
        let _ = waker.join();
        result
    }

    fn event_loop(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let event = match self.backend.wait_for_event() {
                Ok(event) => event,
                Err(ConnectionError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::info!("X server closed the connection");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            if cancel.is_cancelled() {
                return Ok(());
            }
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::ClientMessage(event) => self.tray.client_message(&event),
            Event::DestroyNotify(event) => self.tray.remove(event.window),
            Event::PropertyNotify(event) => self.tray.property_changed(event.window, event.atom),
            Event::Error(e) => log::debug!("X11 error: {:?}", e),
            _ => {}
        }
    }
}
