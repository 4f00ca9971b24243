//! Version lifecycle for the cache handler
//!
//! A `Registration` plays the hosting environment: it remembers which version
//! is active and which one is installed and waiting, fires lifecycle events
//! on the handler, and persists that pointer between runs.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::handler::{CacheHandler, LifecycleHandler};
use super::store::CacheStorage;
use super::types::{Manifest, VersionTag};
use crate::error::CacheError;
use crate::fetch::{Fetcher, Request, Response};
use crate::notify::{ClickOutcome, Notification, NotificationAction};

/// Where a version is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Installing,
    /// Installed and waiting for activation
    Installed,
    Activating,
    Active,
    /// Superseded or never successfully installed
    Redundant,
}

/// The persisted generation pointers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationState {
    /// Generation consulted by `fetch`
    pub active: Option<VersionTag>,
    /// Generation installed but not yet activated
    pub waiting: Option<VersionTag>,
    #[serde(skip)]
    installing: Option<VersionTag>,
    #[serde(skip)]
    activating: Option<VersionTag>,
}

impl RegistrationState {
    pub fn state_of(&self, tag: &VersionTag) -> WorkerState {
        if self.activating.as_ref() == Some(tag) {
            WorkerState::Activating
        } else if self.active.as_ref() == Some(tag) {
            WorkerState::Active
        } else if self.installing.as_ref() == Some(tag) {
            WorkerState::Installing
        } else if self.waiting.as_ref() == Some(tag) {
            WorkerState::Installed
        } else {
            WorkerState::Redundant
        }
    }
}

/// Snapshot reported by `Registration::status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationStatus {
    pub active: Option<VersionTag>,
    pub waiting: Option<VersionTag>,
    /// Every stored generation with its entry count
    pub generations: Vec<(VersionTag, usize)>,
}

/// Drives a `CacheHandler` through install, activate and fetch
pub struct Registration<S, F> {
    handler: CacheHandler<S, F>,
    state: Mutex<RegistrationState>,
    state_path: Option<PathBuf>,
}

impl<S: CacheStorage, F: Fetcher> Registration<S, F> {
    /// A registration whose pointers live only in memory
    pub fn new(handler: CacheHandler<S, F>) -> Self {
        Self {
            handler,
            state: Mutex::new(RegistrationState::default()),
            state_path: None,
        }
    }

    /// A registration persisted as JSON at `path`, loading any saved state
    pub async fn load(handler: CacheHandler<S, F>, path: PathBuf) -> Result<Self, CacheError> {
        let state = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| CacheError::State(format!("parsing {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no saved registration, starting fresh");
                RegistrationState::default()
            }
            Err(e) => {
                return Err(CacheError::State(format!("reading {}: {}", path.display(), e)));
            }
        };

        Ok(Self {
            handler,
            state: Mutex::new(state),
            state_path: Some(path),
        })
    }

    pub fn handler(&self) -> &CacheHandler<S, F> {
        &self.handler
    }

    pub async fn state(&self) -> RegistrationState {
        self.state.lock().await.clone()
    }

    async fn save(&self, state: &RegistrationState) -> Result<(), CacheError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::State(format!("creating {}: {}", parent.display(), e)))?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| CacheError::State(e.to_string()))?;
        fs::write(path, json)
            .await
            .map_err(|e| CacheError::State(format!("writing {}: {}", path.display(), e)))
    }

    /// Install `tag`; on success it waits for `activate`
    ///
    /// The active version keeps serving while the install runs, and a failed
    /// install leaves the pointers untouched.
    pub async fn install(&self, tag: &VersionTag, manifest: &Manifest) -> Result<(), CacheError> {
        {
            let mut state = self.state.lock().await;
            if state.installing.is_some() {
                return Err(CacheError::State("another install is in progress".to_string()));
            }
            state.installing = Some(tag.clone());
        }

        let result = self.handler.install(tag, manifest).await;

        let mut state = self.state.lock().await;
        state.installing = None;
        result?;

        if state.active.as_ref() != Some(tag) {
            state.waiting = Some(tag.clone());
        }
        self.save(&state).await?;
        info!(version = %tag, state = ?state.state_of(tag), "install finished");
        Ok(())
    }

    /// Promote the waiting version and schedule deletion of every other generation
    pub async fn activate(&self) -> Result<VersionTag, CacheError> {
        let tag = {
            let mut state = self.state.lock().await;
            if state.installing.is_some() {
                return Err(CacheError::State("cannot activate while installing".to_string()));
            }
            let tag = state.waiting.clone().ok_or(CacheError::NothingToActivate)?;
            state.activating = Some(tag.clone());
            tag
        };

        let result = self.handler.activate(&tag).await;

        let mut state = self.state.lock().await;
        state.activating = None;
        result?;

        state.active = Some(tag.clone());
        state.waiting = None;
        self.save(&state).await?;
        Ok(tag)
    }

    /// Serve a fetch through the active generation, or straight from the network
    pub async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
        let active = self.state.lock().await.active.clone();
        match active {
            Some(tag) => self.handler.intercept(&tag, request).await,
            None => self.handler.fetcher().fetch(request).await,
        }
    }

    pub fn push(&self, payload: &[u8]) -> Notification {
        self.handler.push(payload)
    }

    pub fn notification_click(
        &self,
        notification: &Notification,
        action: Option<NotificationAction>,
    ) -> ClickOutcome {
        self.handler.notification_click(notification, action)
    }

    pub async fn status(&self) -> Result<RegistrationStatus, CacheError> {
        let state = self.state().await;
        let storage = self.handler.storage();
        let mut generations = Vec::new();
        for tag in storage.keys().await? {
            let count = storage.entries(&tag).await?.len();
            generations.push((tag, count));
        }
        Ok(RegistrationStatus {
            active: state.active,
            waiting: state.waiting,
            generations,
        })
    }

    /// Wait for background cache writes and deletions
    pub async fn settle(&self) {
        self.handler.settle().await
    }
}
