use crate::*;

use std::sync::{Arc, Mutex, MutexGuard};
use x11rb::protocol::xproto::{AtomEnum, Window};

/// Pointer buttons that can be synthesized on an icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
    WheelLeft,
    WheelRight,
}

impl Button {
    /// The core protocol button number.
    pub fn code(self) -> u8 {
        match self {
            Button::Left => 1,
            Button::Middle => 2,
            Button::Right => 3,
            Button::WheelUp => 4,
            Button::WheelDown => 5,
            Button::WheelLeft => 6,
            Button::WheelRight => 7,
        }
    }
}

/// Pixels of an icon window, in the server's Z-pixmap format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub width: u16,
    pub height: u16,
    pub depth: u8,
    pub data: Vec<u8>,
}

/// A docked tray icon.
///
/// The dock window lives inside an override-redirect container that is never mapped for longer
/// than one [`Icon::capture`] or [`Icon::click`]. Operations that touch the visibility of the
/// icon are serialized, so a poll and a click on the same icon cannot unmap each other's window.
#[derive(Debug)]
pub struct Icon {
    backend: Arc<dyn Backend>,
    atoms: Atoms,
    window: Window,
    container: Window,
    mapped: Mutex<bool>,
}

impl Icon {
    pub(crate) fn new(backend: Arc<dyn Backend>, atoms: Atoms, window: Window, container: Window) -> Self {
        Icon { backend, atoms, window, container, mapped: Mutex::new(false) }
    }

    /// The window the tray application asked to dock.
    pub fn window(&self) -> Window {
        self.window
    }

    /// The off-screen window hosting [`Icon::window`].
    pub fn container(&self) -> Window {
        self.container
    }

    pub fn is_mapped(&self) -> bool {
        *self.lock_mapped()
    }

    /// Map the container and the icon. Does nothing if they are mapped already.
    pub fn map(&self) -> Result<()> {
        let mut mapped = self.lock_mapped();
        self.map_locked(&mut mapped)
    }

    /// Unmap the icon and the container. Does nothing if they are unmapped already.
    pub fn unmap(&self) -> Result<()> {
        let mut mapped = self.lock_mapped();
        self.unmap_locked(&mut mapped)
    }

    /// Read the current contents of the icon window.
    ///
    /// The icon is mapped for the duration of the call if it wasn't already, and is left exactly
    /// as visible as it was before, whether the capture succeeds or not.
    pub fn capture(&self) -> Result<Capture> {
        let window = self.window;
        self.while_mapped(|| {
            let geometry = self.backend.geometry(window)?;
            let image = self.backend.image(window, geometry.width, geometry.height)?;
            Ok(Capture { width: geometry.width, height: geometry.height, depth: image.depth, data: image.data })
        })
        .map_err(|e| Error::Capture { window, source: Box::new(e) })
    }

    /// Synthesize a press and release of `button` in the middle of the icon window.
    ///
    /// `root_x`/`root_y` are passed along as the pointer position on the screen.
    pub fn click(&self, button: Button, root_x: i16, root_y: i16) -> Result<()> {
        self.while_mapped(|| {
            let (event_x, event_y) = match self.backend.geometry(self.window) {
                Ok(geometry) => ((geometry.width / 2) as i16, (geometry.height / 2) as i16),
                Err(_) => (0, 0),
            };
            let mut event = ButtonEvent { button: button.code(), pressed: true, root_x, root_y, event_x, event_y };
            self.backend.send_button_event(self.window, event)?;
            event.pressed = false;
            self.backend.send_button_event(self.window, event)?;
            self.backend.sync()
        })
    }

    /// The name of the application owning the icon.
    ///
    /// Prefers `_NET_WM_NAME`, then `WM_NAME`, and falls back to a name made up from the window
    /// id.
    pub fn title(&self) -> String {
        let text_property = |property, type_| match self.backend.property(self.window, property, type_) {
            Ok(value) if !value.is_empty() => Some(String::from_utf8_lossy(&value).trim_end_matches('\0').to_owned()),
            _ => None,
        };
        text_property(self.atoms._NET_WM_NAME, self.atoms.UTF8_STRING)
            .filter(|title| !title.is_empty())
            .or_else(|| text_property(self.atoms.WM_NAME, AtomEnum::STRING.into()).filter(|title| !title.is_empty()))
            .unwrap_or_else(|| format!("xembed-{}", self.window))
    }

    fn lock_mapped(&self) -> MutexGuard<'_, bool> {
        self.mapped.lock().unwrap() // unwrap: mutex poisoning is okay
    }

    /// Run `f` with the icon mapped, restoring the previous visibility afterwards.
    fn while_mapped<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut mapped = self.lock_mapped();
        let was_mapped = *mapped;
        self.map_locked(&mut mapped)?;
        let result = f();
        if !was_mapped {
            if let Err(e) = self.unmap_locked(&mut mapped) {
                log::debug!("failed to hide icon 0x{:x} again: {}", self.window, e);
            }
        }
        result
    }

    fn map_locked(&self, mapped: &mut MutexGuard<'_, bool>) -> Result<()> {
        if **mapped {
            return Ok(());
        }
        self.backend.map_window(self.container)?;
        self.backend.map_window(self.window)?;
        self.backend.sync()?;
        **mapped = true;
        Ok(())
    }

    fn unmap_locked(&self, mapped: &mut MutexGuard<'_, bool>) -> Result<()> {
        if !**mapped {
            return Ok(());
        }
        self.backend.unmap_window(self.window)?;
        self.backend.unmap_window(self.container)?;
        self.backend.sync()?;
        **mapped = false;
        Ok(())
    }
}
