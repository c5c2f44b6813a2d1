use thiserror::Error;
use x11rb::{
    errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError},
    protocol::xproto::Window,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not connect to the X server")]
    Connect(#[from] ConnectError),
    #[error("X11 connection error")]
    Connection(#[from] ConnectionError),
    #[error("X11 request failed")]
    Reply(#[from] ReplyError),
    #[error("X11 request failed")]
    ReplyOrId(#[from] ReplyOrIdError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("System tray is already owned by window 0x{0:x}")]
    TrayAlreadyOwned(Window),
    #[error("Failed to capture window 0x{window:x}")]
    Capture {
        window: Window,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
