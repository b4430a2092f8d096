//! Shared engine state guarded by a single lock.
//!
//! The scan loop, the chat bot, and the REST server all read and mutate
//! the same client registry. [`SharedState`] is the one handle they share:
//! a cheap `Clone` around an `Arc<Mutex<EngineState>>`.
//!
//! Lock discipline: every accessor takes the lock, copies or mutates, and
//! releases it before returning. Nothing awaits while holding it. Registry
//! mutations persist to disk *inside* the lock and only commit to memory
//! once the write succeeded, so memory and disk never disagree.

use chrono::{DateTime, Utc};
use prospector_core::client::{merge_client, normalize_client, upsert_client};
use prospector_core::{ClientConfig, Listing};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

use crate::storage::Storage;

/// Most recent listings kept per client for `GET /offers`.
pub const OFFER_CACHE_LIMIT: usize = 50;

/// Registry validation failures surfaced to API and chat callers.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("chat_id is required")]
    MissingChatId,
    #[error("client not found: {0}")]
    ClientNotFound(String),
    #[error("preference index out of range: {0}")]
    IndexOutOfRange(usize),
    #[error("failed to persist client registry: {0}")]
    Persist(#[source] anyhow::Error),
}

/// Everything behind the lock.
#[derive(Default)]
pub struct EngineState {
    pub clients: Vec<ClientConfig>,
    pub running: bool,
    pub last_offers: HashMap<String, Vec<Listing>>,
    pub pending_locales: HashMap<String, String>,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub engine_task: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<EngineState>>,
    storage: Arc<Storage>,
}

impl SharedState {
    pub fn new(storage: Arc<Storage>, clients: Vec<ClientConfig>) -> Self {
        let state = EngineState {
            clients,
            running: true,
            ..EngineState::default()
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
            storage,
        }
    }

    /// Load the registry from disk and start in the running state.
    pub fn load(storage: Arc<Storage>) -> anyhow::Result<Self> {
        let clients = storage.load_clients()?;
        Ok(Self::new(storage, clients))
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Apply `mutate` to a copy of the registry, persist the copy, then
    /// commit it. The lock is held for the whole sequence.
    fn mutate_clients<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<ClientConfig>) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        self.mutate_clients_and(mutate, |_, _| {})
    }

    /// Like [`Self::mutate_clients`], with `on_commit` run on the rest of
    /// the state in the same critical section, only after the write
    /// succeeded.
    fn mutate_clients_and<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<ClientConfig>) -> Result<T, RegistryError>,
        on_commit: impl FnOnce(&mut EngineState, &T),
    ) -> Result<T, RegistryError> {
        let mut state = self.lock();
        let mut next = state.clients.clone();
        let result = mutate(&mut next)?;
        self.storage
            .save_clients(&next)
            .map_err(RegistryError::Persist)?;
        state.clients = next;
        on_commit(&mut *state, &result);
        Ok(result)
    }

    // ── Registry reads ────────────────────────────────────────

    pub fn clients(&self) -> Vec<ClientConfig> {
        self.lock().clients.clone()
    }

    pub fn active_clients(&self) -> Vec<ClientConfig> {
        self.lock()
            .clients
            .iter()
            .filter(|c| c.active)
            .cloned()
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn find_client(&self, chat_id: &str) -> Option<ClientConfig> {
        self.lock()
            .clients
            .iter()
            .find(|c| c.chat_id == chat_id)
            .cloned()
    }

    // ── Registry writes ───────────────────────────────────────

    /// Create or partially update a client from raw JSON (aliases allowed).
    ///
    /// An existing client is merged with the payload so omitted fields
    /// keep their stored values.
    pub fn upsert_payload(&self, payload: &Value) -> Result<ClientConfig, RegistryError> {
        let incoming = normalize_client(payload);
        if incoming.chat_id.trim().is_empty() {
            return Err(RegistryError::MissingChatId);
        }
        self.mutate_clients(|clients| {
            let merged = match clients.iter().find(|c| c.chat_id == incoming.chat_id) {
                Some(existing) => merge_client(existing, payload),
                None => incoming,
            };
            Ok(upsert_client(clients, merged))
        })
    }

    /// Store a fully built profile (chat flow). Clears any pending locale
    /// for that chat.
    pub fn upsert_client(&self, client: ClientConfig) -> Result<ClientConfig, RegistryError> {
        if client.chat_id.trim().is_empty() {
            return Err(RegistryError::MissingChatId);
        }
        self.mutate_clients_and(
            |clients| Ok(upsert_client(clients, client)),
            |state, stored| {
                state.pending_locales.remove(&stored.chat_id);
            },
        )
    }

    /// Merge a raw update into the client with `chat_id`.
    pub fn update_client(&self, chat_id: &str, payload: &Value) -> Result<ClientConfig, RegistryError> {
        self.mutate_clients(|clients| {
            let slot = clients
                .iter_mut()
                .find(|c| c.chat_id == chat_id)
                .ok_or_else(|| RegistryError::ClientNotFound(chat_id.to_string()))?;
            let mut merged = merge_client(slot, payload);
            merged.chat_id = chat_id.to_string();
            *slot = merged.clone();
            Ok(merged)
        })
    }

    pub fn set_active(&self, chat_id: &str, active: bool) -> Result<ClientConfig, RegistryError> {
        self.mutate_clients(|clients| {
            let slot = clients
                .iter_mut()
                .find(|c| c.chat_id == chat_id)
                .ok_or_else(|| RegistryError::ClientNotFound(chat_id.to_string()))?;
            slot.active = active;
            Ok(slot.clone())
        })
    }

    pub fn set_locale(&self, chat_id: &str, locale: &str) -> Result<ClientConfig, RegistryError> {
        self.mutate_clients(|clients| {
            let slot = clients
                .iter_mut()
                .find(|c| c.chat_id == chat_id)
                .ok_or_else(|| RegistryError::ClientNotFound(chat_id.to_string()))?;
            slot.locale = locale.to_string();
            Ok(slot.clone())
        })
    }

    pub fn delete_client(&self, chat_id: &str) -> Result<ClientConfig, RegistryError> {
        self.mutate_clients(|clients| {
            let index = clients
                .iter()
                .position(|c| c.chat_id == chat_id)
                .ok_or_else(|| RegistryError::ClientNotFound(chat_id.to_string()))?;
            Ok(clients.remove(index))
        })
    }

    /// Merge a raw update into the client at registry position `index`.
    pub fn update_at(&self, index: usize, payload: &Value) -> Result<ClientConfig, RegistryError> {
        self.mutate_clients(|clients| {
            let slot = clients
                .get_mut(index)
                .ok_or(RegistryError::IndexOutOfRange(index))?;
            let merged = merge_client(slot, payload);
            *slot = merged.clone();
            Ok(merged)
        })
    }

    pub fn delete_at(&self, index: usize) -> Result<ClientConfig, RegistryError> {
        self.mutate_clients(|clients| {
            if index >= clients.len() {
                return Err(RegistryError::IndexOutOfRange(index));
            }
            Ok(clients.remove(index))
        })
    }

    // ── Offer cache ───────────────────────────────────────────

    /// Prepend a cycle's listings to the client's cache, keeping the
    /// newest [`OFFER_CACHE_LIMIT`]. Empty batches leave the cache alone.
    pub fn store_offers(&self, chat_id: &str, listings: &[Listing]) {
        if listings.is_empty() {
            return;
        }
        let mut state = self.lock();
        let cache = state.last_offers.entry(chat_id.to_string()).or_default();
        let mut combined = listings.to_vec();
        combined.append(cache);
        combined.truncate(OFFER_CACHE_LIMIT);
        *cache = combined;
    }

    pub fn offers_for(&self, chat_id: &str) -> Vec<Listing> {
        self.lock()
            .last_offers
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_offers(&self) -> BTreeMap<String, Vec<Listing>> {
        self.lock()
            .last_offers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // ── Engine flags ──────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    pub fn mark_scanned(&self, at: DateTime<Utc>) {
        self.lock().last_scan_at = Some(at);
    }

    pub fn last_scan_at(&self) -> Option<DateTime<Utc>> {
        self.lock().last_scan_at
    }

    /// Record the spawned scan loop. Returns `false` (and drops `spawn`
    /// unused) when a live loop is already attached.
    pub fn attach_engine_task(&self, spawn: impl FnOnce() -> JoinHandle<()>) -> bool {
        let mut state = self.lock();
        state.running = true;
        if state
            .engine_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return false;
        }
        state.engine_task = Some(spawn());
        true
    }

    pub fn engine_alive(&self) -> bool {
        self.lock()
            .engine_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    // ── Pending locales ───────────────────────────────────────

    pub fn pending_locale(&self, chat_id: &str) -> Option<String> {
        self.lock().pending_locales.get(chat_id).cloned()
    }

    pub fn set_pending_locale(&self, chat_id: &str, locale: &str) {
        self.lock()
            .pending_locales
            .insert(chat_id.to_string(), locale.to_string());
    }
}
