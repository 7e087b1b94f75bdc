//! Extension hub: owns loaded extensions and connected clients.
//!
//! The hub is the [`TopicBroker`] extensions publish into. Each client gets an
//! unbounded channel; the transport that drains it (WebSocket, stdout, ...) is
//! up to the embedder.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::broker::{ClientId, TopicBroker};
use crate::config::HostConfig;
use crate::error::{ExtensionError, Result};
use crate::extension::{loader, Envelope, Extension};

struct ClientEntry {
    topics: HashSet<String>,
    outbound: UnboundedSender<String>,
}

/// Registry of extensions and clients.
pub struct ExtensionHub {
    self_ref: Weak<ExtensionHub>,
    config: Arc<HostConfig>,
    extensions: RwLock<HashMap<String, Arc<Extension>>>,
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
}

impl ExtensionHub {
    pub fn new(config: HostConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config: Arc::new(config),
            extensions: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Arc<HostConfig> {
        &self.config
    }

    /// Weak broker reference handed to extensions.
    pub fn broker(&self) -> Weak<dyn TopicBroker> {
        self.self_ref.clone()
    }

    // ========================================================================
    // Extensions
    // ========================================================================

    /// Load every library in the configured extension directory.
    ///
    /// Failures are logged and skipped. Returns the names that loaded.
    pub fn load_extensions(&self) -> Vec<String> {
        let dir = self.config.extension_dir.clone();
        let paths = match loader::discover(&dir) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to scan extension directory");
                return Vec::new();
            }
        };

        let mut loaded = Vec::new();
        for path in paths {
            match self.load_extension(&path) {
                Ok(name) => loaded.push(name),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping extension"),
            }
        }

        info!(count = loaded.len(), "Extensions loaded");
        loaded
    }

    /// Load, initialize and register one library.
    pub fn load_extension(&self, path: &Path) -> Result<String> {
        let extension = Extension::load(path, self.broker(), self.config.clone())?;
        self.add_extension(extension)
    }

    /// Initialize and register an already constructed extension.
    pub fn add_extension(&self, extension: Extension) -> Result<String> {
        let name = extension.name().to_string();

        if self.extensions.read().contains_key(&name) {
            warn!(extension = %name, "An extension with this name is already loaded");
            return Err(ExtensionError::AlreadyRegistered(name));
        }

        extension.initialize()?;

        let rejected = {
            let mut extensions = self.extensions.write();
            if extensions.contains_key(&name) {
                Some(extension)
            } else {
                extensions.insert(name.clone(), Arc::new(extension));
                None
            }
        };

        if let Some(duplicate) = rejected {
            drop(duplicate);
            return Err(ExtensionError::AlreadyRegistered(name));
        }

        Ok(name)
    }

    /// Unload an extension. Its topics are dropped from every client.
    pub fn unload_extension(&self, name: &str) -> bool {
        let removed = self.extensions.write().remove(name);
        let Some(extension) = removed else {
            return false;
        };

        let prefix = format!("{}/", name);
        for entry in self.clients.write().values_mut() {
            entry.topics.retain(|topic| !topic.starts_with(&prefix));
        }

        // Teardown joins push workers; do it with no hub lock held.
        drop(extension);
        true
    }

    pub fn extension(&self, name: &str) -> Option<Arc<Extension>> {
        self.extensions.read().get(name).cloned()
    }

    pub fn extension_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.extensions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// First name in `required` that is not loaded, if any.
    pub fn check_required<S: AsRef<str>>(&self, required: &[S]) -> Option<String> {
        let extensions = self.extensions.read();
        required
            .iter()
            .map(AsRef::as_ref)
            .find(|name| !extensions.contains_key(*name))
            .map(str::to_string)
    }

    // ========================================================================
    // Clients
    // ========================================================================

    pub fn register_client(&self) -> (ClientId, UnboundedReceiver<String>) {
        let (outbound, inbound) = mpsc::unbounded_channel();
        let client = ClientId::next();

        self.clients.write().insert(
            client,
            ClientEntry {
                topics: HashSet::new(),
                outbound,
            },
        );

        debug!(client = %client, "Client registered");
        (client, inbound)
    }

    /// Forget a client and remove it from every extension.
    pub fn revoke_client(&self, client: ClientId) {
        if self.clients.write().remove(&client).is_none() {
            return;
        }

        let extensions: Vec<_> = self.extensions.read().values().cloned().collect();
        for extension in extensions {
            extension.remove_subscriber(client);
        }

        debug!(client = %client, "Client revoked");
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn client_topics(&self, client: ClientId) -> Vec<String> {
        let clients = self.clients.read();
        let mut topics: Vec<_> = clients
            .get(&client)
            .map(|entry| entry.topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Subscribe `client` to `"extension/source"`.
    pub fn subscribe(&self, client: ClientId, topic: &str) -> bool {
        let Some((name, source)) = topic.split_once('/') else {
            warn!(client = %client, topic, "Malformed topic");
            return false;
        };

        if !self.clients.read().contains_key(&client) {
            warn!(client = %client, "Subscribe from unknown client");
            return false;
        }

        let Some(extension) = self.extension(name) else {
            warn!(client = %client, "Unknown extension {}", name);
            return false;
        };

        if !extension.add_subscriber(client, source) {
            return false;
        }

        match self.clients.write().get_mut(&client) {
            Some(entry) => {
                entry.topics.insert(topic.to_string());
                true
            }
            None => {
                // Revoked while subscribing.
                extension.remove_subscriber(client);
                false
            }
        }
    }

    /// Poll `sources` of `extension` on behalf of `client`; returns the
    /// envelope JSON.
    pub fn query<S: AsRef<str>>(
        &self,
        client: ClientId,
        extension: &str,
        sources: &[S],
        args: Option<&str>,
    ) -> String {
        match self.extension(extension) {
            Some(ext) => ext.poll_data_for_sending(sources, args, client).to_json(),
            None => {
                warn!(client = %client, "Unknown extension {}", extension);
                Envelope::error(format!("Unknown extension {}", extension)).to_json()
            }
        }
    }

    /// Queue `payload` on a client's channel.
    pub fn send_to_client(&self, client: ClientId, payload: &str) -> bool {
        let clients = self.clients.read();
        let Some(entry) = clients.get(&client) else {
            return false;
        };
        entry.outbound.send(payload.to_string()).is_ok()
    }
}

impl TopicBroker for ExtensionHub {
    fn publish_data(&self, topic: &str, payload: &str) {
        let clients = self.clients.read();
        let mut delivered = 0usize;

        for (client, entry) in clients.iter() {
            if !entry.topics.contains(topic) {
                continue;
            }
            if entry.outbound.send(payload.to_string()).is_ok() {
                delivered += 1;
            } else {
                debug!(client = %client, topic, "Client channel closed");
            }
        }

        debug!(topic, delivered, "Published");
    }

    fn find_extension(&self, name: &str) -> bool {
        self.extensions.read().contains_key(name)
    }
}

impl std::fmt::Debug for ExtensionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHub")
            .field("extensions", &self.extension_names())
            .field("clients", &self.client_count())
            .finish()
    }
}
