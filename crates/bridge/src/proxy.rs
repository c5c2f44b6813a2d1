use notifier_item::{ActionHandler, Item, Pixmap};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use xembed_tray::{Button, Capture, Icon};

/// Glue between one docked [`Icon`] and the [`Item`] representing it on the bus.
///
/// Clicks and scrolls on the item are replayed on the icon, and the icon is captured periodically
/// so hosts get told when it changes.
#[derive(Debug)]
pub struct Proxy {
    icon: Arc<Icon>,
    item: Arc<Item>,
    cancel: CancellationToken,
    poll: JoinHandle<()>,
}

impl Proxy {
    /// Install the proxy as the item's action handler and start polling the icon every
    /// `interval`. Needs to be called from within a tokio runtime.
    pub fn new(icon: Arc<Icon>, item: Arc<Item>, interval: Duration) -> Self {
        item.set_handler(Some(Arc::new(IconActions { icon: icon.clone() })));
        let detector = ChangeDetector::seeded(&item.properties().icon_pixmap);
        let cancel = CancellationToken::new();
        let poll = tokio::spawn(poll_icon(icon.clone(), item.clone(), detector, interval, cancel.clone()));
        Proxy { icon, item, cancel, poll }
    }

    pub fn icon(&self) -> &Arc<Icon> {
        &self.icon
    }

    pub fn item(&self) -> &Arc<Item> {
        &self.item
    }

    /// Stop polling and take the item off the bus.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.poll.await {
            log::debug!("Poll task of {} ended abnormally: {}", self.item.service(), e);
        }
        self.item.set_handler(None);
        self.item.close().await;
    }
}

/// Something the poller can take pictures of.
pub trait Capturable: Send + Sync + 'static {
    fn window(&self) -> u32;
    fn capture(&self) -> xembed_tray::Result<Capture>;
}

impl Capturable for Icon {
    fn window(&self) -> u32 {
        Icon::window(self)
    }

    fn capture(&self) -> xembed_tray::Result<Capture> {
        Icon::capture(self)
    }
}

/// Capture `icon` every `period` and publish it on `item` whenever it changed, until `cancel` fires.
async fn poll_icon<C: Capturable>(
    icon: Arc<C>,
    item: Arc<Item>,
    mut detector: ChangeDetector,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let capture = {
            let icon = icon.clone();
            match tokio::task::spawn_blocking(move || icon.capture()).await {
                Ok(Ok(capture)) => capture,
                Ok(Err(e)) => {
                    log::trace!("{}", e);
                    continue;
                }
                Err(e) => {
                    log::debug!("Capture task failed: {}", e);
                    continue;
                }
            }
        };
        if let Some(pixmap) = detector.next_update(&capture) {
            log::debug!("Icon 0x{:x} changed", icon.window());
            if let Err(e) = item.update_icon(vec![pixmap]).await {
                log::warn!("Failed to update icon of {}: {}", item.service(), e);
            }
        }
    }
}

/// Replays actions on an item as pointer button presses on the icon.
struct IconActions {
    icon: Arc<Icon>,
}

impl IconActions {
    fn click(&self, button: Button, x: i32, y: i32) {
        let clamp = |v: i32| v.clamp(i16::MIN.into(), i16::MAX.into()) as i16;
        if let Err(e) = self.icon.click(button, clamp(x), clamp(y)) {
            log::debug!("Failed to click icon 0x{:x}: {}", self.icon.window(), e);
        }
    }
}

impl ActionHandler for IconActions {
    fn activate(&self, x: i32, y: i32) {
        self.click(Button::Left, x, y);
    }

    fn secondary_activate(&self, x: i32, y: i32) {
        self.click(Button::Middle, x, y);
    }

    fn context_menu(&self, x: i32, y: i32) {
        self.click(Button::Right, x, y);
    }

    fn scroll(&self, delta: i32, orientation: &str) {
        self.click(scroll_button(delta, orientation), 0, 0);
    }
}

/// Which wheel button a scroll maps to. Anything but "horizontal" counts as vertical.
pub fn scroll_button(delta: i32, orientation: &str) -> Button {
    let horizontal = orientation.eq_ignore_ascii_case("horizontal");
    match (horizontal, delta < 0) {
        (false, false) => Button::WheelUp,
        (false, true) => Button::WheelDown,
        (true, true) => Button::WheelLeft,
        (true, false) => Button::WheelRight,
    }
}

pub fn fingerprint(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Convert a capture to an SNI pixmap.
///
/// Captures are expected in 32 bits per pixel, stored as little-endian BGRX. Alpha is only kept
/// for 32 bit deep windows, everything else is made opaque. Returns `None` for empty captures
/// and for any other pixel layout.
pub fn pixmap_from_capture(capture: &Capture) -> Option<Pixmap> {
    let (width, height) = (usize::from(capture.width), usize::from(capture.height));
    if width == 0 || height == 0 || capture.data.len() != width * height * 4 {
        return None;
    }
    let keep_alpha = capture.depth == 32;
    let data = capture
        .data
        .chunks_exact(4)
        .flat_map(|px| {
            let (b, g, r, a) = (px[0], px[1], px[2], px[3]);
            [if keep_alpha { a } else { 0xff }, r, g, b]
        })
        .collect();
    Some(Pixmap { width: width as i32, height: height as i32, data })
}

/// Remembers the fingerprint of the last pixmap sent to hosts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeDetector {
    last: Option<u32>,
}

impl ChangeDetector {
    /// Start from what an item currently shows.
    pub fn seeded(pixmaps: &[Pixmap]) -> Self {
        ChangeDetector { last: pixmaps.first().map(|p| fingerprint(&p.data)) }
    }

    /// The pixmap to publish for `capture`, if it differs from the last one.
    pub fn next_update(&mut self, capture: &Capture) -> Option<Pixmap> {
        let pixmap = pixmap_from_capture(capture)?;
        let fingerprint = fingerprint(&pixmap.data);
        if self.last == Some(fingerprint) {
            return None;
        }
        self.last = Some(fingerprint);
        Some(pixmap)
    }
}
