//! Shared application state.
//!
//! Wires the registry, relay handlers, platform client and conversation
//! service together and tracks WebSocket connection counts for the
//! connection-limit middleware.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;
use crate::core::lifecycle::ConversationLifecycle;
use crate::core::platform::{ConversationPlatform, PlatformHandler, create_platform};
use crate::core::registry::ConversationRegistry;
use crate::core::relay::RelayHandlers;
use crate::core::service::{ConversationService, create_conversation_service};
use crate::errors::relay_error::RelayResult;

/// Reason a WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Application state shared by every request handler.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<ConversationRegistry>,
    pub lifecycle: ConversationLifecycle,
    pub platform: Arc<dyn ConversationPlatform>,
    pub service: Arc<dyn ConversationService>,

    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build the state from configuration without touching the network.
    ///
    /// Collaborators are started separately with [`AppState::start`].
    pub async fn new(config: ServerConfig) -> RelayResult<Arc<Self>> {
        let service = create_conversation_service(&config)?;
        let registry = Arc::new(ConversationRegistry::new());
        let handlers =
            RelayHandlers::new(registry.clone(), service.clone(), config.response_timeout());
        let platform = create_platform(&config, Arc::new(handlers.clone()))?;
        Ok(Self::assemble(config, registry, handlers, platform, service))
    }

    /// Build the state around caller-supplied collaborators.
    ///
    /// `platform` receives the relay handlers the platform must call back
    /// into.
    pub fn with_collaborators<F>(
        config: ServerConfig,
        service: Arc<dyn ConversationService>,
        platform: F,
    ) -> Arc<Self>
    where
        F: FnOnce(Arc<dyn PlatformHandler>) -> Arc<dyn ConversationPlatform>,
    {
        let registry = Arc::new(ConversationRegistry::new());
        let handlers =
            RelayHandlers::new(registry.clone(), service.clone(), config.response_timeout());
        let platform = platform(Arc::new(handlers.clone()));
        Self::assemble(config, registry, handlers, platform, service)
    }

    fn assemble(
        config: ServerConfig,
        registry: Arc<ConversationRegistry>,
        handlers: RelayHandlers,
        platform: Arc<dyn ConversationPlatform>,
        service: Arc<dyn ConversationService>,
    ) -> Arc<Self> {
        let lifecycle = ConversationLifecycle::new(handlers, platform.clone());
        Arc::new(Self {
            config,
            registry,
            lifecycle,
            platform,
            service,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Connect the platform and check the conversation service.
    pub async fn start(&self) -> RelayResult<()> {
        self.service.start().await?;
        self.platform.start().await?;
        tracing::info!(
            service = self.service.name(),
            concurrency = self.platform.concurrency(),
            "Collaborators started"
        );
        Ok(())
    }

    /// Close every active conversation and disconnect the platform.
    pub async fn shutdown(&self) {
        for conversation_id in self.registry.snapshot().into_values() {
            self.lifecycle
                .handlers()
                .close_conversation(&conversation_id)
                .await;
        }
        self.platform.shutdown().await;
    }

    /// Connection id → conversation id for every active conversation.
    pub fn connected_clients(&self) -> BTreeMap<String, String> {
        self.registry.snapshot()
    }

    /// Reserve a WebSocket slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        match self.config.max_websocket_connections {
            Some(max) => {
                if self
                    .ws_connections
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < max).then_some(n + 1)
                    })
                    .is_err()
                {
                    return Err(ConnectionLimitError::GlobalLimitReached);
                }
            }
            None => {
                self.ws_connections.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            drop(per_ip);
            self.ws_connections.fetch_sub(1, Ordering::SeqCst);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *per_ip += 1;
        Ok(())
    }

    /// Give back a slot taken by [`AppState::try_acquire_connection`].
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        let now_empty = match self.ip_connections.get_mut(&ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if now_empty {
            self.ip_connections.remove_if(&ip, |_, count| *count == 0);
        }
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}
