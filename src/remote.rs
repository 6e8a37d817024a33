use reqwest::StatusCode;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PersistenceError;
use crate::models::Document;

/// Per-identity document store holding a user's whole collection.
pub trait RemoteStore: Send + Sync {
    fn get(&self, uid: &str) -> Result<Option<Document>, PersistenceError>;
    fn put(&self, uid: &str, document: &Document) -> Result<(), PersistenceError>;
    fn describe(&self) -> String;
}

// --- HTTP store ---

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON documents at `{base_url}/applications/{uid}`.
#[derive(Debug)]
pub struct HttpRemoteStore {
    base_url: reqwest::Url,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, PersistenceError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| PersistenceError::Remote(format!("invalid remote URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(PersistenceError::Remote(format!(
                "remote URL '{}' cannot hold document paths",
                base_url
            )));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base_url, token, client })
    }

    fn document_url(&self, uid: &str) -> Result<reqwest::Url, PersistenceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PersistenceError::Remote(format!("bad remote URL '{}'", self.base_url)))?
            .pop_if_empty()
            .extend(["applications", uid]);
        Ok(url)
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl RemoteStore for HttpRemoteStore {
    fn get(&self, uid: &str) -> Result<Option<Document>, PersistenceError> {
        let url = self.document_url(uid)?;
        let response = self.authorize(self.client.get(url.clone())).send()?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(PersistenceError::Remote(format!(
                "GET {} failed with status {}: {}",
                url, status, error_text
            )));
        }

        Ok(Some(response.json::<Document>()?))
    }

    fn put(&self, uid: &str, document: &Document) -> Result<(), PersistenceError> {
        let url = self.document_url(uid)?;
        let response = self
            .authorize(self.client.put(url.clone()))
            .json(document)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(PersistenceError::Remote(format!(
                "PUT {} failed with status {}: {}",
                url, status, error_text
            )));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.base_url.to_string()
    }
}

// --- Directory store ---

/// One `{uid}.json` file per identity, e.g. inside a synced folder.
#[derive(Debug)]
pub struct DirectoryRemoteStore {
    root: PathBuf,
}

impl DirectoryRemoteStore {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    fn document_path(&self, uid: &str) -> Result<PathBuf, PersistenceError> {
        let safe = !uid.is_empty()
            && !uid.starts_with('.')
            && uid
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !safe {
            return Err(PersistenceError::Remote(format!(
                "identity '{}' cannot be used as a file name",
                uid
            )));
        }
        Ok(self.root.join(format!("{}.json", uid)))
    }
}

impl RemoteStore for DirectoryRemoteStore {
    fn get(&self, uid: &str) -> Result<Option<Document>, PersistenceError> {
        let path = self.document_path(uid)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn put(&self, uid: &str, document: &Document) -> Result<(), PersistenceError> {
        let path = self.document_path(uid)?;
        fs::create_dir_all(&self.root)?;

        // Write then rename so readers never see a partial document
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(document)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

// --- In-memory store ---

#[cfg(test)]
pub use memory::MemoryRemoteStore;
