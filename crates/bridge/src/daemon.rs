use anyhow::{Context, Result};
use notifier_item::{names::ServiceNames, Item, Pixmap, Properties};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use xembed_tray::{Icon, TrayEvent};

use crate::proxy::{pixmap_from_capture, Proxy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How often each icon is captured to look for changes.
    pub poll_interval: Duration,
    /// `Category` of every item.
    pub category: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig { poll_interval: Duration::from_millis(300), category: "ApplicationStatus".to_string() }
    }
}

/// Turn tray events into StatusNotifierItems until `cancel` fires or the tray manager goes away.
pub async fn run(config: BridgeConfig, mut events: mpsc::Receiver<TrayEvent>, cancel: CancellationToken) {
    let names = ServiceNames::new();
    let mut proxies: HashMap<u32, Proxy> = HashMap::new();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            TrayEvent::IconAdded(icon) => {
                let window = icon.window();
                match bridge_icon(&config, &names, icon).await {
                    Ok(proxy) => {
                        proxies.insert(window, proxy);
                    }
                    Err(e) => log::warn!("Skipping tray icon 0x{:x}: {:?}", window, e),
                }
            }
            TrayEvent::IconRemoved(icon) => {
                if let Some(proxy) = proxies.remove(&icon.window()) {
                    proxy.close().await;
                }
            }
            TrayEvent::TitleChanged(icon) => {
                let Some(proxy) = proxies.get(&icon.window()) else { continue };
                let icon = proxy.icon().clone();
                let title = match tokio::task::spawn_blocking(move || icon.title()).await {
                    Ok(title) => title,
                    Err(e) => {
                        log::debug!("Title lookup failed: {}", e);
                        continue;
                    }
                };
                if let Err(e) = proxy.item().update_title(title).await {
                    log::warn!("Failed to update title of {}: {}", proxy.item().service(), e);
                }
            }
        }
    }

    log::info!("Closing {} StatusNotifierItems", proxies.len());
    for (_, proxy) in proxies.drain() {
        proxy.close().await;
    }
}

/// Publish a freshly docked icon on its own bus connection.
async fn bridge_icon(config: &BridgeConfig, names: &ServiceNames, icon: Arc<Icon>) -> Result<Proxy> {
    let (pixmap, title) = {
        let icon = icon.clone();
        tokio::task::spawn_blocking(move || {
            let pixmap = match icon.capture() {
                Ok(capture) => pixmap_from_capture(&capture),
                Err(e) => {
                    log::debug!("No initial pixmap: {}", e);
                    None
                }
            };
            (pixmap, icon.title())
        })
        .await?
    };

    let con = zbus::Connection::session().await.context("Failed to connect to the session bus")?;
    let properties = initial_properties(config, icon.window(), title, pixmap);
    let item = Item::create(con, names.allocate(), properties, None).await?;
    Ok(Proxy::new(icon, Arc::new(item), config.poll_interval))
}

fn initial_properties(config: &BridgeConfig, window: u32, title: String, pixmap: Option<Pixmap>) -> Properties {
    Properties {
        category: config.category.clone(),
        id: format!("xembed-{}", window),
        title,
        status: "Active".to_string(),
        window_id: window,
        icon_pixmap: pixmap.into_iter().collect(),
        item_is_menu: false,
    }
}
