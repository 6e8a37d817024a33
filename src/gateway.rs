use std::fmt;
use std::sync::Arc;

use crate::error::PersistenceError;
use crate::identity::Identity;
use crate::models::{Document, Record};
use crate::remote::RemoteStore;
use crate::storage::LocalStore;

/// Local blob key holding the signed-out collection.
pub const LOCAL_KEY: &str = "jobApplications";

/// Where a save lands: the local blob, or one identity's remote document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageTarget {
    Local,
    Remote(String),
}

impl StorageTarget {
    pub fn for_identity(identity: Option<&Identity>) -> Self {
        match identity {
            Some(identity) => StorageTarget::Remote(identity.uid.clone()),
            None => StorageTarget::Local,
        }
    }
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTarget::Local => f.write_str("local"),
            StorageTarget::Remote(uid) => write!(f, "remote:{}", uid),
        }
    }
}

pub struct PersistenceGateway {
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl PersistenceGateway {
    pub fn new(local: Arc<dyn LocalStore>, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self { local, remote }
    }

    /// Reconciles storage for `identity`.
    ///
    /// Signed out, this is the local blob. Signed in, it is the remote document,
    /// unless that is missing or empty, in which case the local blob is returned
    /// so work tracked before signing in is not lost.
    pub fn load(&self, identity: Option<&Identity>) -> Result<Vec<Record>, PersistenceError> {
        let Some(identity) = identity else {
            let records = self.load_local()?;
            log::info!("event=load source=local records={}", records.len());
            return Ok(records);
        };

        let remote = self.remote(&identity.uid)?;
        match remote.get(&identity.uid)? {
            Some(document) if !document.items.is_empty() => {
                log::info!(
                    "event=load source=remote uid={} records={}",
                    identity.uid,
                    document.items.len()
                );
                Ok(document.items)
            }
            found => {
                let records = self.load_local()?;
                log::info!(
                    "event=load source=local_fallback uid={} remote_document={} records={}",
                    identity.uid,
                    if found.is_some() { "empty" } else { "absent" },
                    records.len()
                );
                Ok(records)
            }
        }
    }

    /// Full replace of the collection at `target`. Never writes anywhere else.
    pub fn save(&self, target: &StorageTarget, records: &[Record]) -> Result<(), PersistenceError> {
        let result = match target {
            StorageTarget::Local => serde_json::to_string(records)
                .map_err(PersistenceError::from)
                .and_then(|raw| self.local.set(LOCAL_KEY, &raw)),
            StorageTarget::Remote(uid) => self.remote(uid).and_then(|remote| {
                let document = Document {
                    items: records.to_vec(),
                };
                remote.put(uid, &document)
            }),
        };

        match &result {
            Ok(()) => log::debug!(
                "event=save target={} records={} status=ok",
                target,
                records.len()
            ),
            Err(e) => log::warn!(
                "event=save target={} records={} status=error error={}",
                target,
                records.len(),
                e
            ),
        }
        result
    }

    /// Empties the active store and drops the local blob.
    pub fn clear(&self, target: &StorageTarget) -> Result<(), PersistenceError> {
        if let StorageTarget::Remote(_) = target {
            self.save(target, &[])?;
        }
        self.local.remove(LOCAL_KEY)?;
        log::info!("event=clear target={}", target);
        Ok(())
    }

    pub fn remote_description(&self) -> Option<String> {
        self.remote.as_ref().map(|remote| remote.describe())
    }

    fn load_local(&self) -> Result<Vec<Record>, PersistenceError> {
        match self.local.get(LOCAL_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn remote(&self, uid: &str) -> Result<&Arc<dyn RemoteStore>, PersistenceError> {
        self.remote
            .as_ref()
            .ok_or_else(|| PersistenceError::NotConfigured(uid.to_string()))
    }
}
