use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus connection error")]
    DbusError(#[from] zbus::Error),
    #[error("Bus name {0} is not available")]
    NameUnavailable(String),
    #[error("StatusNotifierWatcher refused to register {service}")]
    WatcherRegistration {
        service: String,
        #[source]
        source: zbus::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
