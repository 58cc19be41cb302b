use std::sync::Arc;
use serde::Serialize;
use tracing::warn;

use crate::errors::{MapError, Result};
use crate::store::{KeyValueStore, LAST_SESSION_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: &'static str,
    pub name: &'static str,
}

pub const TRAINING: Session =
    Session { id: "9ed5512e-b6eb-401f-bab8-42bdbdcf2bab", name: "Training Server" };
pub const CASUAL: Session =
    Session { id: "7e4681bf-9fee-4c68-ba62-eda1f2f0e780", name: "Casual Server" };
pub const EXPERT: Session =
    Session { id: "9bdfef34-f03b-4413-b8fa-c29949bb18f8", name: "Expert Server" };

pub const SESSIONS: [Session; 3] = [TRAINING, CASUAL, EXPERT];

pub fn find_session(id: &str) -> Option<Session> {
    SESSIONS.iter().copied().find(|s| s.id == id)
}

/// The active network session, persisted under `lastSession`.
pub struct SessionSelector {
    store: Arc<dyn KeyValueStore>,
    active: Session,
}

impl SessionSelector {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let active = match store.get(LAST_SESSION_KEY) {
            Some(id) => find_session(&id).unwrap_or_else(|| {
                warn!("ignoring stored session {}, not a known session", id);
                TRAINING
            }),
            None => TRAINING,
        };
        SessionSelector { store, active }
    }

    pub fn get_active(&self) -> Session {
        self.active
    }

    pub fn set_active(&mut self, id: &str) -> Result<Session> {
        let session = find_session(id).ok_or_else(|| MapError::UnknownSession(id.to_string()))?;
        self.active = session;
        if let Err(e) = self.store.set(LAST_SESSION_KEY, session.id) {
            warn!("failed to persist session {}: {}", session.id, e);
        }
        Ok(session)
    }
}
