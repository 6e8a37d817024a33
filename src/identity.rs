use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::error::{IdentityError, PersistenceError};
use crate::storage::LocalStore;

pub const SESSION_KEY: &str = "session";

/// A signed-in user. `uid` keys the remote document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            display_name: None,
        }
    }
}

pub trait IdentityProvider {
    fn sign_in(&mut self, uid: &str, display_name: Option<&str>) -> Result<Identity, IdentityError>;
    fn sign_out(&mut self) -> Result<(), IdentityError>;
    fn current(&self) -> Option<Identity>;

    /// Change feed. The receiver already holds the current state when returned.
    fn subscribe(&mut self) -> Receiver<Option<Identity>>;
}

/// Keeps the session in local storage so it survives between runs.
pub struct SessionProvider {
    store: Arc<dyn LocalStore>,
    current: Option<Identity>,
    subscribers: Vec<Sender<Option<Identity>>>,
}

impl SessionProvider {
    pub fn restore(store: Arc<dyn LocalStore>) -> Result<Self, IdentityError> {
        let current = match store.get(SESSION_KEY)? {
            Some(raw) => Some(
                serde_json::from_str::<Identity>(&raw).map_err(PersistenceError::from)?,
            ),
            None => None,
        };
        if let Some(identity) = &current {
            log::debug!("event=session_restore uid={}", identity.uid);
        }
        Ok(Self {
            store,
            current,
            subscribers: Vec::new(),
        })
    }

    fn notify(&mut self) {
        let current = &self.current;
        // Dropped receivers fall out of the list
        self.subscribers.retain(|tx| tx.send(current.clone()).is_ok());
    }
}

impl IdentityProvider for SessionProvider {
    fn sign_in(&mut self, uid: &str, display_name: Option<&str>) -> Result<Identity, IdentityError> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(IdentityError::EmptyUid);
        }
        let mut identity = Identity::new(uid);
        identity.display_name = display_name.map(str::to_string);
        if self.current.as_ref() == Some(&identity) {
            return Ok(identity);
        }

        let raw = serde_json::to_string(&identity).map_err(PersistenceError::from)?;
        self.store.set(SESSION_KEY, &raw)?;
        self.current = Some(identity.clone());
        log::info!("event=sign_in uid={}", identity.uid);
        self.notify();
        Ok(identity)
    }

    fn sign_out(&mut self) -> Result<(), IdentityError> {
        let Some(previous) = self.current.take() else {
            return Ok(());
        };
        self.store.remove(SESSION_KEY)?;
        log::info!("event=sign_out uid={}", previous.uid);
        self.notify();
        Ok(())
    }

    fn current(&self) -> Option<Identity> {
        self.current.clone()
    }

    fn subscribe(&mut self) -> Receiver<Option<Identity>> {
        let (tx, rx) = mpsc::channel();
        // Receiver is alive, so this cannot fail
        let _ = tx.send(self.current.clone());
        self.subscribers.push(tx);
        rx
    }
}
