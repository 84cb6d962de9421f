use std::sync::{Arc, RwLock};

use indexmap::IndexSet;
use sandbox::{PortAction, PortEvent};

use crate::subscription::{ListenerId, Listeners};

/// The set of preview URLs currently served from inside the sandbox.
///
/// Unlike the shadow tree, changes are announced immediately: port events
/// are rare and the UI wants to show a preview as soon as it comes up.
/// Listeners are only called when the set actually changes.
pub struct PreviewPorts {
    urls: RwLock<Arc<IndexSet<String>>>,
    listeners: Listeners<Vec<String>>,
}

impl PreviewPorts {
    pub fn new() -> Self {
        Self {
            urls: RwLock::new(Arc::new(IndexSet::new())),
            listeners: Listeners::new(),
        }
    }

    pub fn add(&self, url: impl Into<String>) {
        let url = url.into();

        let changed = self.mutate(|urls| urls.insert(url.clone()));
        if changed {
            log::info!("Preview available: {}", url);
        }
    }

    pub fn remove(&self, url: &str) {
        let changed = self.mutate(|urls| urls.shift_remove(url));
        if changed {
            log::info!("Preview closed: {}", url);
        }
    }

    pub fn clear(&self) {
        self.mutate(|urls| {
            let had_any = !urls.is_empty();
            urls.clear();
            had_any
        });
    }

    pub fn handle_port_event(&self, event: &PortEvent) {
        log::debug!("Port {} {:?} ({})", event.port, event.action, event.url);

        match event.action {
            PortAction::Open => self.add(event.url.clone()),
            PortAction::Close => self.remove(&event.url),
        }
    }

    /// Live URLs in the order they were opened.
    pub fn urls(&self) -> Vec<String> {
        self.urls.read().unwrap().iter().cloned().collect()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.read().unwrap().contains(url)
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        self.listeners.subscribe(move |urls: &Vec<String>| listener(urls))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Applies `change` to a copy of the set and swaps it in if `change`
    /// reports that something changed.
    fn mutate<F>(&self, change: F) -> bool
    where
        F: FnOnce(&mut IndexSet<String>) -> bool,
    {
        let snapshot = {
            let mut urls = self.urls.write().unwrap();
            let mut next = IndexSet::clone(&urls);

            if !change(&mut next) {
                return false;
            }

            let snapshot: Vec<String> = next.iter().cloned().collect();
            *urls = Arc::new(next);
            snapshot
        };

        self.listeners.notify(&snapshot);
        true
    }
}

impl Default for PreviewPorts {
    fn default() -> Self {
        Self::new()
    }
}
