use crate::*;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock, RwLockReadGuard,
};

/// One entry of the `IconPixmap` property: ARGB32 pixels in network byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixmap {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

/// Everything an item exposes as DBus properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Properties {
    pub category: String,
    pub id: String,
    pub title: String,
    pub status: String,
    pub window_id: u32,
    pub icon_pixmap: Vec<Pixmap>,
    pub item_is_menu: bool,
}

/// What to do when a host interacts with an item.
///
/// Calls happen on a blocking thread, so implementations are free to do synchronous work.
pub trait ActionHandler: Send + Sync {
    fn activate(&self, x: i32, y: i32);
    fn secondary_activate(&self, x: i32, y: i32);
    fn context_menu(&self, x: i32, y: i32);
    fn scroll(&self, delta: i32, orientation: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Activate(i32, i32),
    SecondaryActivate(i32, i32),
    ContextMenu(i32, i32),
    Scroll(i32, String),
}

/// State shared between an [`Item`] and its exported interface.
struct ItemState {
    properties: RwLock<Properties>,
    handler: RwLock<Option<Arc<dyn ActionHandler>>>,
}

impl ItemState {
    fn new(properties: Properties, handler: Option<Arc<dyn ActionHandler>>) -> Self {
        ItemState { properties: RwLock::new(properties), handler: RwLock::new(handler) }
    }

    fn properties(&self) -> RwLockReadGuard<'_, Properties> {
        self.properties.read().unwrap() // unwrap: lock poisoning is okay
    }

    fn update(&self, f: impl FnOnce(&mut Properties)) {
        let mut properties = self.properties.write().unwrap(); // unwrap: lock poisoning is okay
        f(&mut properties);
    }

    fn set_handler(&self, handler: Option<Arc<dyn ActionHandler>>) {
        *self.handler.write().unwrap() = handler; // unwrap: lock poisoning is okay
    }

    /// Run `action` on the current handler, if there is one.
    fn dispatch(&self, action: Action) -> Option<tokio::task::JoinHandle<()>> {
        let handler = self.handler.read().unwrap().clone()?; // unwrap: lock poisoning is okay
        Some(tokio::task::spawn_blocking(move || match action {
            Action::Activate(x, y) => handler.activate(x, y),
            Action::SecondaryActivate(x, y) => handler.secondary_activate(x, y),
            Action::ContextMenu(x, y) => handler.context_menu(x, y),
            Action::Scroll(delta, orientation) => handler.scroll(delta, &orientation),
        }))
    }
}

/// The exported `org.kde.StatusNotifierItem` object.
struct StatusNotifierItem {
    state: Arc<ItemState>,
}

/// Implementation of the `StatusNotifierItem` service.
///
/// `org.freedesktop.DBus.Properties` and `org.freedesktop.DBus.Introspectable` are provided for it
/// by the object server. Setting any property fails with `PropertyReadOnly`, and asking for
/// properties of any other interface fails with `UnknownInterface`.
#[zbus::interface(name = "org.kde.StatusNotifierItem")]
impl StatusNotifierItem {
    /// Activate method
    async fn activate(&self, x: i32, y: i32) {
        self.state.dispatch(Action::Activate(x, y));
    }

    /// SecondaryActivate method
    async fn secondary_activate(&self, x: i32, y: i32) {
        self.state.dispatch(Action::SecondaryActivate(x, y));
    }

    /// ContextMenu method
    async fn context_menu(&self, x: i32, y: i32) {
        self.state.dispatch(Action::ContextMenu(x, y));
    }

    /// Scroll method
    async fn scroll(&self, delta: i32, orientation: String) {
        self.state.dispatch(Action::Scroll(delta, orientation));
    }

    /// NewIcon signal
    #[zbus(signal)]
    async fn new_icon(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// NewTitle signal
    #[zbus(signal)]
    async fn new_title(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// Category property
    #[zbus(property)]
    async fn category(&self) -> String {
        self.state.properties().category.clone()
    }

    /// Id property
    #[zbus(property)]
    async fn id(&self) -> String {
        self.state.properties().id.clone()
    }

    /// Title property
    #[zbus(property)]
    async fn title(&self) -> String {
        self.state.properties().title.clone()
    }

    /// Status property
    #[zbus(property)]
    async fn status(&self) -> String {
        self.state.properties().status.clone()
    }

    /// WindowId property
    #[zbus(property)]
    async fn window_id(&self) -> u32 {
        self.state.properties().window_id
    }

    /// IconPixmap property
    #[zbus(property)]
    async fn icon_pixmap(&self) -> Vec<(i32, i32, Vec<u8>)> {
        let properties = self.state.properties();
        properties.icon_pixmap.iter().map(|p| (p.width, p.height, p.data.clone())).collect()
    }

    /// ItemIsMenu property
    #[zbus(property)]
    async fn item_is_menu(&self) -> bool {
        self.state.properties().item_is_menu
    }

    #[zbus(property)]
    async fn set_category(&self, _value: &zbus::zvariant::Value<'_>) -> zbus::Result<()> {
        Err(read_only("Category").into())
    }

    #[zbus(property)]
    async fn set_id(&self, _value: &zbus::zvariant::Value<'_>) -> zbus::Result<()> {
        Err(read_only("Id").into())
    }

    #[zbus(property)]
    async fn set_title(&self, _value: &zbus::zvariant::Value<'_>) -> zbus::Result<()> {
        Err(read_only("Title").into())
    }

    #[zbus(property)]
    async fn set_status(&self, _value: &zbus::zvariant::Value<'_>) -> zbus::Result<()> {
        Err(read_only("Status").into())
    }

    #[zbus(property)]
    async fn set_window_id(&self, _value: &zbus::zvariant::Value<'_>) -> zbus::Result<()> {
        Err(read_only("WindowId").into())
    }

    #[zbus(property)]
    async fn set_icon_pixmap(&self, _value: &zbus::zvariant::Value<'_>) -> zbus::Result<()> {
        Err(read_only("IconPixmap").into())
    }

    #[zbus(property)]
    async fn set_item_is_menu(&self, _value: &zbus::zvariant::Value<'_>) -> zbus::Result<()> {
        Err(read_only("ItemIsMenu").into())
    }
}

fn read_only(name: &str) -> zbus::fdo::Error {
    zbus::fdo::Error::PropertyReadOnly(format!("Property '{name}' is read-only"))
}

/// Map the reply to a name request to whether the name is ours now.
fn check_name_reply(service: &str, reply: zbus::Result<zbus::fdo::RequestNameReply>) -> Result<()> {
    match reply {
        Ok(zbus::fdo::RequestNameReply::PrimaryOwner) => Ok(()),
        Ok(_) | Err(zbus::Error::NameTaken) => Err(Error::NameUnavailable(service.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// A StatusNotifierItem served on its own bus name.
///
/// The connection should not be shared with other items, since every item lives at the same
/// object path.
pub struct Item {
    con: zbus::Connection,
    service: String,
    state: Arc<ItemState>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item").field("service", &self.service).finish_non_exhaustive()
    }
}

impl Item {
    /// Claim `service` on `con`, export the item and register it with the StatusNotifierWatcher.
    ///
    /// Nothing is exported unless `con` becomes the primary owner of `service`. If the watcher
    /// rejects the item, the object and the name are given up again.
    pub async fn create(
        con: zbus::Connection,
        service: String,
        properties: Properties,
        handler: Option<Arc<dyn ActionHandler>>,
    ) -> Result<Item> {
        let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];
        let reply = con.request_name_with_flags(service.as_str(), flags.into_iter().collect()).await;
        check_name_reply(&service, reply)?;

        let item = Item::new(con, service, properties, handler);
        let registered = match item.export_object().await {
            Ok(()) => item.register().await,
            Err(e) => Err(e),
        };
        if let Err(e) = registered {
            item.close().await;
            return Err(e);
        }
        log::info!("Registered StatusNotifierItem {}", item.service);
        Ok(item)
    }

    /// Export the item on `con` without claiming `service` or talking to a watcher.
    ///
    /// This is all a peer-to-peer connection supports.
    pub async fn export(
        con: zbus::Connection,
        service: String,
        properties: Properties,
        handler: Option<Arc<dyn ActionHandler>>,
    ) -> Result<Item> {
        let item = Item::new(con, service, properties, handler);
        item.export_object().await?;
        Ok(item)
    }

    fn new(con: zbus::Connection, service: String, properties: Properties, handler: Option<Arc<dyn ActionHandler>>) -> Self {
        Item { con, service, state: Arc::new(ItemState::new(properties, handler)), closed: AtomicBool::new(false) }
    }

    async fn export_object(&self) -> Result<()> {
        let iface = StatusNotifierItem { state: self.state.clone() };
        if !self.con.object_server().at(names::ITEM_OBJECT, iface).await? {
            return Err(Error::DbusError(zbus::Error::Failure(format!(
                "Object already exists at {} on this connection",
                names::ITEM_OBJECT
            ))));
        }
        Ok(())
    }

    async fn register(&self) -> Result<()> {
        let snw = dbus::StatusNotifierWatcherProxy::new(&self.con).await?;
        snw.register_status_notifier_item(&self.service)
            .await
            .map_err(|source| Error::WatcherRegistration { service: self.service.clone(), source })
    }

    /// The bus name the item is served on.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// A snapshot of the current properties.
    pub fn properties(&self) -> Properties {
        self.state.properties().clone()
    }

    /// Replace the action handler. With no handler, actions are ignored.
    pub fn set_handler(&self, handler: Option<Arc<dyn ActionHandler>>) {
        self.state.set_handler(handler);
    }

    /// Replace the icon and tell hosts about it.
    pub async fn update_icon(&self, pixmaps: Vec<Pixmap>) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.state.update(|p| p.icon_pixmap = pixmaps);
        StatusNotifierItem::new_icon(&self.signal_context()?).await?;
        Ok(())
    }

    /// Replace the title and tell hosts about it.
    pub async fn update_title(&self, title: String) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.state.update(|p| p.title = title);
        StatusNotifierItem::new_title(&self.signal_context()?).await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Withdraw the object and release the bus name. Calling this more than once does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.con.object_server().remove::<StatusNotifierItem, _>(names::ITEM_OBJECT).await {
            log::debug!("Failed to unexport {}: {}", self.service, e);
        }
        if let Err(e) = self.con.release_name(self.service.as_str()).await {
            log::debug!("Failed to release {}: {}", self.service, e);
        }
        log::info!("Closed StatusNotifierItem {}", self.service);
    }

    fn signal_context(&self) -> zbus::Result<zbus::SignalContext<'static>> {
        zbus::SignalContext::new(&self.con, names::ITEM_OBJECT)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn properties() -> Properties {
        Properties {
            category: "ApplicationStatus".to_string(),
            id: "xembed-42".to_string(),
            title: "tray app".to_string(),
            status: "Active".to_string(),
            window_id: 42,
            icon_pixmap: vec![],
            item_is_menu: false,
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<Action>>,
    }

    impl ActionHandler for RecordingHandler {
        fn activate(&self, x: i32, y: i32) {
            self.calls.lock().unwrap().push(Action::Activate(x, y));
        }

        fn secondary_activate(&self, x: i32, y: i32) {
            self.calls.lock().unwrap().push(Action::SecondaryActivate(x, y));
        }

        fn context_menu(&self, x: i32, y: i32) {
            self.calls.lock().unwrap().push(Action::ContextMenu(x, y));
        }

        fn scroll(&self, delta: i32, orientation: &str) {
            self.calls.lock().unwrap().push(Action::Scroll(delta, orientation.to_string()));
        }
    }

    #[tokio::test]
    async fn test_dispatch_without_handler() {
        let state = ItemState::new(properties(), None);
        assert!(state.dispatch(Action::Activate(1, 2)).is_none());
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let handler = Arc::new(RecordingHandler::default());
        let state = ItemState::new(properties(), Some(handler.clone()));

        state.dispatch(Action::Activate(1, 2)).unwrap().await.unwrap();
        state.dispatch(Action::ContextMenu(3, 4)).unwrap().await.unwrap();
        state.dispatch(Action::Scroll(-1, "vertical".to_string())).unwrap().await.unwrap();

        assert_eq!(
            *handler.calls.lock().unwrap(),
            vec![Action::Activate(1, 2), Action::ContextMenu(3, 4), Action::Scroll(-1, "vertical".to_string())]
        );
    }

    #[tokio::test]
    async fn test_swap_handler() {
        let first = Arc::new(RecordingHandler::default());
        let second = Arc::new(RecordingHandler::default());
        let state = ItemState::new(properties(), Some(first.clone()));

        state.set_handler(Some(second.clone()));
        state.dispatch(Action::SecondaryActivate(5, 6)).unwrap().await.unwrap();
        state.set_handler(None);
        assert!(state.dispatch(Action::Activate(0, 0)).is_none());

        assert_eq!(*first.calls.lock().unwrap(), vec![]);
        assert_eq!(*second.calls.lock().unwrap(), vec![Action::SecondaryActivate(5, 6)]);
    }

    #[test]
    fn test_updates_are_visible() {
        let state = ItemState::new(properties(), None);
        let pixmap = Pixmap { width: 1, height: 1, data: vec![0xff, 1, 2, 3] };

        state.update(|p| p.icon_pixmap = vec![pixmap.clone()]);
        state.update(|p| p.title = "renamed".to_string());

        let expected = Properties { title: "renamed".to_string(), icon_pixmap: vec![pixmap], ..properties() };
        assert_eq!(*state.properties(), expected);
    }

    #[test]
    fn test_check_name_reply() {
        use zbus::fdo::RequestNameReply;
        let service = "org.kde.StatusNotifierItem-1-0";

        assert!(check_name_reply(service, Ok(RequestNameReply::PrimaryOwner)).is_ok());
        for reply in [RequestNameReply::InQueue, RequestNameReply::Exists, RequestNameReply::AlreadyOwner] {
            assert!(matches!(check_name_reply(service, Ok(reply)), Err(Error::NameUnavailable(name)) if name == service));
        }
        assert!(matches!(
            check_name_reply(service, Err(zbus::Error::NameTaken)),
            Err(Error::NameUnavailable(name)) if name == service
        ));
        assert!(matches!(
            check_name_reply(service, Err(zbus::Error::Failure("bus went away".to_string()))),
            Err(Error::DbusError(zbus::Error::Failure(_)))
        ));
    }

    async fn p2p_pair() -> (zbus::Connection, zbus::Connection) {
        let guid = zbus::Guid::generate();
        let (server, client) = tokio::net::UnixStream::pair().unwrap();
        tokio::try_join!(
            zbus::connection::Builder::unix_stream(server).server(guid).unwrap().p2p().build(),
            zbus::connection::Builder::unix_stream(client).p2p().build(),
        )
        .unwrap()
    }

    async fn exported_item() -> (Item, zbus::fdo::PropertiesProxy<'static>) {
        let (server, client) = p2p_pair().await;
        let item = Item::export(server, "org.kde.StatusNotifierItem-1-0".to_string(), properties(), None).await.unwrap();
        let proxy = zbus::fdo::PropertiesProxy::builder(&client)
            .destination("org.kde.StatusNotifierItem-1-0")
            .unwrap()
            .path(names::ITEM_OBJECT)
            .unwrap()
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await
            .unwrap();
        (item, proxy)
    }

    fn item_interface() -> zbus::names::InterfaceName<'static> {
        zbus::names::InterfaceName::from_static_str(names::ITEM_INTERFACE).unwrap()
    }

    #[tokio::test]
    async fn test_get_all_reflects_updates() {
        let (item, proxy) = exported_item().await;
        let pixmap = Pixmap { width: 1, height: 1, data: vec![0xff, 1, 2, 3] };
        item.update_title("old".to_string()).await.unwrap();
        item.update_title("new".to_string()).await.unwrap();
        item.update_icon(vec![pixmap]).await.unwrap();

        let mut all = proxy.get_all(Some(item_interface()).into()).await.unwrap();
        let mut keys: Vec<_> = all.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["Category", "Id", "IconPixmap", "ItemIsMenu", "Status", "Title", "WindowId"]);

        assert_eq!(String::try_from(all.remove("Title").unwrap()).unwrap(), "new");
        assert_eq!(String::try_from(all.remove("Category").unwrap()).unwrap(), "ApplicationStatus");
        assert_eq!(u32::try_from(&all["WindowId"]).unwrap(), 42);
        assert!(!bool::try_from(&all["ItemIsMenu"]).unwrap());
        let pixmaps = all.remove("IconPixmap").map(zbus::zvariant::Value::from).unwrap();
        let pixmaps = <Vec<(i32, i32, Vec<u8>)>>::try_from(pixmaps).unwrap();
        assert_eq!(pixmaps, vec![(1, 1, vec![0xff, 1, 2, 3])]);

        let title = proxy.get(item_interface(), "Title").await.unwrap();
        assert_eq!(String::try_from(title).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_properties_are_read_only() {
        let (item, proxy) = exported_item().await;
        let writes: [(&str, zbus::zvariant::Value<'_>); 7] = [
            ("Category", "Hardware".into()),
            ("Id", "other".into()),
            ("Title", "x".into()),
            ("Status", "Passive".into()),
            ("WindowId", 7u32.into()),
            ("IconPixmap", vec![0u8; 4].into()),
            ("ItemIsMenu", true.into()),
        ];
        for (name, value) in writes {
            let result = proxy.set(item_interface(), name, &value).await;
            assert!(matches!(result, Err(zbus::fdo::Error::PropertyReadOnly(_))), "{name}: {result:?}");
        }
        assert_eq!(item.properties(), properties());
    }

    #[tokio::test]
    async fn test_other_interfaces_are_unknown() {
        let (_item, proxy) = exported_item().await;
        let other = zbus::names::InterfaceName::from_static_str("org.example.Other").unwrap();

        assert!(matches!(proxy.get(other.clone(), "Title").await, Err(zbus::fdo::Error::UnknownInterface(_))));
        assert!(matches!(proxy.get_all(Some(other).into()).await, Err(zbus::fdo::Error::UnknownInterface(_))));
    }

    #[tokio::test]
    async fn test_introspection_lists_item_interface() {
        let (server, client) = p2p_pair().await;
        let _item = Item::export(server, "org.kde.StatusNotifierItem-1-0".to_string(), properties(), None).await.unwrap();
        let introspectable = zbus::fdo::IntrospectableProxy::builder(&client)
            .destination("org.kde.StatusNotifierItem-1-0")
            .unwrap()
            .path(names::ITEM_OBJECT)
            .unwrap()
            .build()
            .await
            .unwrap();

        let xml = introspectable.introspect().await.unwrap();
        assert!(xml.contains(r#"<interface name="org.kde.StatusNotifierItem">"#), "{xml}");
        assert!(xml.contains(r#"<signal name="NewIcon">"#), "{xml}");
    }

    #[tokio::test]
    async fn test_updates_emit_signals() {
        use futures::StreamExt;

        let (server, client) = p2p_pair().await;
        let mut messages = zbus::MessageStream::from(&client);
        let item = Item::export(server, "org.kde.StatusNotifierItem-1-0".to_string(), properties(), None).await.unwrap();

        item.update_icon(vec![Pixmap { width: 1, height: 1, data: vec![0; 4] }]).await.unwrap();
        item.update_title("renamed".to_string()).await.unwrap();
        item.close().await;
        // updates after close stay silent
        item.update_title("ignored".to_string()).await.unwrap();

        let mut signals = vec![];
        while signals.len() < 2 {
            let msg = messages.next().await.unwrap().unwrap();
            let header = msg.header();
            if msg.message_type() != zbus::message::Type::Signal || header.interface().map(|i| i.as_str()) != Some(names::ITEM_INTERFACE) {
                continue;
            }
            assert_eq!(header.path().map(|p| p.as_str()), Some(names::ITEM_OBJECT));
            signals.push(header.member().unwrap().to_string());
        }
        assert_eq!(signals, vec!["NewIcon", "NewTitle"]);
        assert_eq!(item.properties().title, "renamed");
    }

    #[tokio::test]
    #[ignore = "needs a session bus"]
    async fn test_name_unavailable() {
        let owner = zbus::Connection::session().await.unwrap();
        let service = format!("{}-{}-test", names::ITEM_INTERFACE, std::process::id());
        owner.request_name(service.as_str()).await.unwrap();

        let con = zbus::Connection::session().await.unwrap();
        let result = Item::create(con.clone(), service.clone(), properties(), None).await;

        assert!(matches!(result, Err(Error::NameUnavailable(name)) if name == service));
        assert!(con.object_server().interface::<_, StatusNotifierItem>(names::ITEM_OBJECT).await.is_err());
    }
}
