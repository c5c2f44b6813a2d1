use crate::*;

use x11rb::{
    connection::Connection,
    protocol::{xproto::*, Event},
    rust_connection::{DefaultStream, RustConnection},
    wrapper::ConnectionExt as _,
};

// see https://github.com/dancor/wmctrl/blob/master/main.c
const MAX_PROPERTY_VALUE_LEN: u32 = 4096;

/// Size of a window as reported by the X server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u16,
    pub height: u16,
}

/// Raw contents of a window, as returned by `GetImage` in Z-pixmap format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub depth: u8,
    pub data: Vec<u8>,
}

/// A synthetic pointer button event, addressed directly to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: u8,
    pub pressed: bool,
    pub root_x: i16,
    pub root_y: i16,
    pub event_x: i16,
    pub event_y: i16,
}

/// The X11 requests needed to embed, show, hide, capture and poke at tray icons.
///
/// Requests used while embedding are checked, so a window that vanished surfaces as an error at
/// the call site. Mapping, unmapping and button events are only queued; follow them with
/// [`Backend::sync`].
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Create an unmapped, override-redirect container window on the root window.
    fn create_container(&self, x: i16, y: i16, width: u16, height: u16) -> Result<Window>;
    fn destroy_window(&self, window: Window) -> Result<()>;
    fn reparent_window(&self, window: Window, parent: Window) -> Result<()>;
    fn resize_window(&self, window: Window, width: u16, height: u16) -> Result<()>;
    /// Subscribe to structure and property changes of `window`.
    fn watch_window(&self, window: Window) -> Result<()>;
    fn add_to_save_set(&self, window: Window) -> Result<()>;
    fn change_property32(&self, window: Window, property: Atom, type_: Atom, data: &[u32]) -> Result<()>;
    fn send_client_message(&self, window: Window, type_: Atom, data: [u32; 5]) -> Result<()>;
    fn map_window(&self, window: Window) -> Result<()>;
    fn unmap_window(&self, window: Window) -> Result<()>;
    /// Round trip to the server, so every request sent before has been processed.
    fn sync(&self) -> Result<()>;
    fn geometry(&self, window: Window) -> Result<Geometry>;
    fn image(&self, window: Window, width: u16, height: u16) -> Result<Image>;
    /// Read a property of the given type. An unset property yields an empty buffer.
    fn property(&self, window: Window, property: Atom, type_: Atom) -> Result<Vec<u8>>;
    fn send_button_event(&self, window: Window, event: ButtonEvent) -> Result<()>;
}

/// [`Backend`] on top of a real connection to the X server.
#[derive(Debug)]
pub struct X11Backend {
    conn: RustConnection<DefaultStream>,
    root_window: Window,
    root_visual: Visualid,
    atoms: Atoms,
}

impl X11Backend {
    /// Connect to the display named by `$DISPLAY` and intern the tray atoms.
    pub fn new() -> Result<Self> {
        let (conn, screen_num) = RustConnection::connect(None)?;
        let screen = conn.setup().roots[screen_num].clone();
        let atoms = Atoms::new(&conn)?.reply()?;
        Ok(X11Backend { conn, root_window: screen.root, root_visual: screen.root_visual, atoms })
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    pub fn root_window(&self) -> Window {
        self.root_window
    }

    pub fn selection_owner(&self, selection: Atom) -> Result<Window> {
        Ok(self.conn.get_selection_owner(selection)?.reply()?.owner)
    }

    /// Create the 1x1 input-only window that owns the tray selection.
    pub fn create_selection_window(&self) -> Result<Window> {
        let window = self.conn.generate_id()?;
        let values = CreateWindowAux::new().event_mask(EventMask::STRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE);
        self.conn
            .create_window(
                x11rb::COPY_DEPTH_FROM_PARENT,
                window,
                self.root_window,
                0,
                0,
                1,
                1,
                0,
                WindowClass::INPUT_ONLY,
                self.root_visual,
                &values,
            )?
            .check()?;
        Ok(window)
    }

    pub fn set_selection_owner(&self, owner: Window, selection: Atom) -> Result<()> {
        self.conn.set_selection_owner(owner, selection, x11rb::CURRENT_TIME)?.check()?;
        Ok(())
    }

    /// Tell every client listening on the root window that `owner` now manages the tray.
    pub fn broadcast_manager(&self, owner: Window) -> Result<()> {
        let event = ClientMessageEvent::new(
            32,
            self.root_window,
            self.atoms.MANAGER,
            [x11rb::CURRENT_TIME, self.atoms._NET_SYSTEM_TRAY_S0, owner, 0, 0],
        );
        self.conn.send_event(false, self.root_window, EventMask::STRUCTURE_NOTIFY, event)?.check()?;
        Ok(())
    }

    pub fn wait_for_event(&self) -> std::result::Result<Event, x11rb::errors::ConnectionError> {
        self.conn.wait_for_event()
    }

    /// Unblock [`X11Backend::wait_for_event`] by sending an empty client message to a window
    /// created on this connection.
    pub fn wake(&self, window: Window) -> Result<()> {
        let event = ClientMessageEvent::new(32, window, self.atoms.MANAGER, [0u32; 5]);
        self.conn.send_event(false, window, EventMask::NO_EVENT, event)?;
        self.conn.flush()?;
        Ok(())
    }
}

impl Backend for X11Backend {
    fn create_container(&self, x: i16, y: i16, width: u16, height: u16) -> Result<Window> {
        let window = self.conn.generate_id()?;
        let values = CreateWindowAux::new()
            .event_mask(EventMask::STRUCTURE_NOTIFY | EventMask::EXPOSURE | EventMask::PROPERTY_CHANGE)
            .override_redirect(1);
        self.conn
            .create_window(
                x11rb::COPY_DEPTH_FROM_PARENT,
                window,
                self.root_window,
                x,
                y,
                width,
                height,
                0,
                WindowClass::INPUT_OUTPUT,
                self.root_visual,
                &values,
            )?
            .check()?;
        Ok(window)
    }

    fn destroy_window(&self, window: Window) -> Result<()> {
        self.conn.destroy_window(window)?.check()?;
        Ok(())
    }

    fn reparent_window(&self, window: Window, parent: Window) -> Result<()> {
        self.conn.reparent_window(window, parent, 0, 0)?.check()?;
        Ok(())
    }

    fn resize_window(&self, window: Window, width: u16, height: u16) -> Result<()> {
        let values = ConfigureWindowAux::new().width(u32::from(width)).height(u32::from(height));
        self.conn.configure_window(window, &values)?.check()?;
        Ok(())
    }

    fn watch_window(&self, window: Window) -> Result<()> {
        let values = ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE);
        self.conn.change_window_attributes(window, &values)?.check()?;
        Ok(())
    }

    fn add_to_save_set(&self, window: Window) -> Result<()> {
        self.conn.change_save_set(SetMode::INSERT, window)?.check()?;
        Ok(())
    }

    fn change_property32(&self, window: Window, property: Atom, type_: Atom, data: &[u32]) -> Result<()> {
        self.conn.change_property32(PropMode::REPLACE, window, property, type_, data)?.check()?;
        Ok(())
    }

    fn send_client_message(&self, window: Window, type_: Atom, data: [u32; 5]) -> Result<()> {
        let event = ClientMessageEvent::new(32, window, type_, data);
        self.conn.send_event(false, window, EventMask::NO_EVENT, event)?.check()?;
        Ok(())
    }

    fn map_window(&self, window: Window) -> Result<()> {
        self.conn.map_window(window)?;
        Ok(())
    }

    fn unmap_window(&self, window: Window) -> Result<()> {
        self.conn.unmap_window(window)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.conn.get_input_focus()?.reply()?;
        Ok(())
    }

    fn geometry(&self, window: Window) -> Result<Geometry> {
        let reply = self.conn.get_geometry(window)?.reply()?;
        Ok(Geometry { width: reply.width, height: reply.height })
    }

    fn image(&self, window: Window, width: u16, height: u16) -> Result<Image> {
        let reply = self.conn.get_image(ImageFormat::Z_PIXMAP, window, 0, 0, width, height, !0)?.reply()?;
        Ok(Image { depth: reply.depth, data: reply.data })
    }

    fn property(&self, window: Window, property: Atom, type_: Atom) -> Result<Vec<u8>> {
        let reply = self.conn.get_property(false, window, property, type_, 0, MAX_PROPERTY_VALUE_LEN / 4)?.reply()?;
        Ok(reply.value)
    }

    fn send_button_event(&self, window: Window, event: ButtonEvent) -> Result<()> {
        let (response_type, mask) = if event.pressed {
            (BUTTON_PRESS_EVENT, EventMask::BUTTON_PRESS)
        } else {
            (BUTTON_RELEASE_EVENT, EventMask::BUTTON_RELEASE)
        };
        let xevent = ButtonPressEvent {
            response_type,
            detail: event.button,
            sequence: 0,
            time: x11rb::CURRENT_TIME,
            root: self.root_window,
            event: window,
            child: x11rb::NONE,
            root_x: event.root_x,
            root_y: event.root_y,
            event_x: event.event_x,
            event_y: event.event_y,
            state: KeyButMask::from(0u16),
            same_screen: true,
        };
        self.conn.send_event(false, window, mask, xevent)?;
        Ok(())
    }
}
