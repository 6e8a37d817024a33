//! The application state controller.
//!
//! `Tracker` owns the in-memory collection, the form draft and the active
//! identity. Every mutation queues a full snapshot on the [`SaveQueue`]; failures
//! come back through [`Tracker::flush`] and [`Tracker::poll_save_errors`].

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::csv;
use crate::error::{ImportError, PersistenceError, ValidationError};
use crate::gateway::{PersistenceGateway, StorageTarget};
use crate::identity::Identity;
use crate::models::{Draft, IdGenerator, Record, RecordId, Status};
use crate::saver::{SaveOutcome, SaveQueue};

pub struct Tracker {
    gateway: Arc<PersistenceGateway>,
    saver: SaveQueue,
    identity: Option<Identity>,
    records: Vec<Record>,
    draft: Draft,
    ids: IdGenerator,
    failures: Vec<PersistenceError>,
}

impl Tracker {
    pub fn new(gateway: Arc<PersistenceGateway>) -> Self {
        let saver = SaveQueue::start(gateway.clone());
        Self {
            gateway,
            saver,
            identity: None,
            records: Vec::new(),
            draft: Draft::default(),
            ids: IdGenerator::default(),
            failures: Vec::new(),
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn target(&self) -> StorageTarget {
        StorageTarget::for_identity(self.identity.as_ref())
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut Draft {
        &mut self.draft
    }

    pub fn is_editing(&self) -> bool {
        self.draft.id.is_some()
    }

    // --- Identity ---

    /// Reconciles storage for a new identity state and replaces the collection.
    ///
    /// Saves still queued for the previous identity are written first. On
    /// failure neither the identity nor the collection changes.
    pub fn apply_identity(&mut self, identity: Option<Identity>) -> Result<usize, PersistenceError> {
        let outcomes = self.saver.flush();
        self.collect(outcomes);

        let records = self.gateway.load(identity.as_ref())?;
        self.ids = IdGenerator::seeded(&records);
        self.records = records;
        self.identity = identity;
        self.draft = Draft::default();
        Ok(self.records.len())
    }

    /// Applies the newest state waiting on an identity change feed.
    pub fn sync_identity(
        &mut self,
        events: &Receiver<Option<Identity>>,
    ) -> Result<bool, PersistenceError> {
        let mut latest = None;
        while let Ok(identity) = events.try_recv() {
            latest = Some(identity);
        }
        match latest {
            Some(identity) => {
                self.apply_identity(identity)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // --- Form ---

    /// Creates a record from the draft, or replaces the one being edited.
    pub fn submit_form(&mut self) -> Result<RecordId, ValidationError> {
        if self.draft.company.trim().is_empty() {
            return Err(ValidationError::MissingField("company"));
        }
        if self.draft.position.trim().is_empty() {
            return Err(ValidationError::MissingField("position"));
        }

        let id = match self.draft.id {
            Some(id) => {
                let slot = self
                    .records
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or(ValidationError::UnknownRecord(id))?;
                *slot = self.draft.to_record(id);
                log::info!("event=record_update id={}", id);
                id
            }
            None => {
                let id = self.ids.next_id()?;
                self.records.push(self.draft.to_record(id));
                log::info!("event=record_create id={}", id);
                id
            }
        };

        self.draft = Draft::default();
        self.schedule_save();
        Ok(id)
    }

    pub fn start_edit(&mut self, id: RecordId) -> Result<(), ValidationError> {
        let record = self.record(id).ok_or(ValidationError::UnknownRecord(id))?;
        let draft = Draft::from_record(record);
        self.draft = draft;
        Ok(())
    }

    pub fn cancel_edit(&mut self) {
        self.draft = Draft::default();
    }

    // --- Collection ---

    /// Returns whether a record was removed.
    pub fn delete(&mut self, id: RecordId) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        if self.records.len() == before {
            return false;
        }

        if self.draft.id == Some(id) {
            self.draft = Draft::default();
        }
        log::info!("event=record_delete id={}", id);
        self.schedule_save();
        true
    }

    pub fn set_status(&mut self, id: RecordId, status: Status) -> Result<(), ValidationError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(ValidationError::UnknownRecord(id))?;
        if record.status == status {
            return Ok(());
        }
        record.status = status;
        log::info!("event=record_status id={} status={}", id, status);
        self.schedule_save();
        Ok(())
    }

    /// Empties the collection once `confirm` agrees, writing the empty
    /// collection to the active store straight away rather than via the queue.
    pub fn clear_all<F>(&mut self, confirm: F) -> Result<bool, PersistenceError>
    where
        F: FnOnce(usize) -> bool,
    {
        if !confirm(self.records.len()) {
            return Ok(false);
        }

        // Nothing queued may land after the clear
        let outcomes = self.saver.flush();
        self.collect(outcomes);

        self.records.clear();
        self.draft = Draft::default();
        self.gateway.clear(&self.target())?;
        Ok(true)
    }

    /// Appends rows as new records; existing records are left alone. Either
    /// every row gets an id or nothing is imported.
    pub fn import_rows(&mut self, rows: Vec<Record>) -> Result<usize, ValidationError> {
        let mut ids = self.ids.clone();
        let mut assigned = Vec::with_capacity(rows.len());
        for mut row in rows {
            row.id = ids.next_id()?;
            assigned.push(row);
        }

        let count = assigned.len();
        self.ids = ids;
        self.records.extend(assigned);
        log::info!("event=import records={}", count);
        if count > 0 {
            self.schedule_save();
        }
        Ok(count)
    }

    /// Decodes CSV text and imports every row, or nothing if any row is bad.
    pub fn import_csv(&mut self, text: &str) -> Result<usize, ImportError> {
        let rows = csv::decode(text, &mut IdGenerator::default())?;
        Ok(self.import_rows(rows)?)
    }

    pub fn export_csv(&self) -> String {
        csv::encode(&self.records)
    }

    // --- Persistence ---

    /// Waits for queued saves; returns the first failure reported since the
    /// last flush or poll.
    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        let outcomes = self.saver.flush();
        self.collect(outcomes);

        let mut failures = std::mem::take(&mut self.failures).into_iter();
        match failures.next() {
            Some(first) => {
                for rest in failures {
                    log::warn!("event=save_failure_dropped error={}", rest);
                }
                Err(first)
            }
            None => Ok(()),
        }
    }

    pub fn poll_save_errors(&mut self) -> Vec<PersistenceError> {
        let outcomes = self.saver.poll();
        self.collect(outcomes);
        std::mem::take(&mut self.failures)
    }

    fn schedule_save(&mut self) {
        let target = self.target();
        if let Err(e) = self.saver.submit(target, self.records.clone()) {
            log::error!("event=save_submit status=error error={}", e);
            self.failures.push(e);
        }
    }

    fn collect(&mut self, outcomes: Vec<SaveOutcome>) {
        for outcome in outcomes {
            match outcome {
                SaveOutcome::Saved { generation, target } => {
                    log::debug!("event=save_done generation={} target={}", generation, target);
                }
                SaveOutcome::Superseded { generation, target } => {
                    log::debug!("event=save_skipped generation={} target={}", generation, target);
                }
                SaveOutcome::Failed {
                    generation,
                    target,
                    error,
                } => {
                    log::error!(
                        "event=save_failed generation={} target={} error={}",
                        generation,
                        target,
                        error
                    );
                    self.failures.push(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LOCAL_KEY;
    use crate::identity::{IdentityProvider, SessionProvider};
    use crate::models::Document;
    use crate::remote::{MemoryRemoteStore, RemoteStore};
    use crate::storage::{LocalStore, MemoryStore};
    use std::collections::HashSet;

    struct Fixture {
        local: Arc<MemoryStore>,
        remote: Arc<MemoryRemoteStore>,
        tracker: Tracker,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(MemoryStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let gateway = Arc::new(PersistenceGateway::new(local.clone(), Some(remote.clone())));
        Fixture {
            local,
            remote,
            tracker: Tracker::new(gateway),
        }
    }

    fn add(tracker: &mut Tracker, company: &str, position: &str) -> RecordId {
        let draft = tracker.draft_mut();
        draft.company = company.to_string();
        draft.position = position.to_string();
        tracker.submit_form().unwrap()
    }

    fn saved_locally(local: &MemoryStore) -> Vec<Record> {
        let raw = local.get(LOCAL_KEY).unwrap().unwrap_or_else(|| "[]".to_string());
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_submit_appends_and_saves() {
        let Fixture { local, mut tracker, .. } = fixture();
        let a = add(&mut tracker, "Acme", "Eng");
        let b = add(&mut tracker, "Globex", "Ops");
        assert_ne!(a, b);
        assert_eq!(tracker.records().len(), 2);
        assert_eq!(tracker.records()[1].company, "Globex");
        assert_eq!(tracker.draft(), &Draft::default());

        tracker.flush().unwrap();
        assert_eq!(saved_locally(&local), tracker.records());
    }

    #[test]
    fn test_submit_without_required_fields_changes_nothing() {
        let Fixture { mut tracker, .. } = fixture();
        add(&mut tracker, "Acme", "Eng");
        let before = tracker.records().to_vec();

        tracker.draft_mut().company = "Globex".to_string();
        tracker.draft_mut().position = "   ".to_string();
        assert!(matches!(
            tracker.submit_form(),
            Err(ValidationError::MissingField("position"))
        ));

        tracker.draft_mut().company = String::new();
        tracker.draft_mut().position = "Ops".to_string();
        assert!(matches!(
            tracker.submit_form(),
            Err(ValidationError::MissingField("company"))
        ));

        assert_eq!(tracker.records(), &before[..]);
        // Draft is kept so the user can fix it
        assert_eq!(tracker.draft().position, "Ops");
    }

    #[test]
    fn test_edit_replaces_in_place() {
        let Fixture { mut tracker, .. } = fixture();
        add(&mut tracker, "Acme", "Eng");
        let b = add(&mut tracker, "Globex", "Ops");
        add(&mut tracker, "Initech", "QA");

        tracker.start_edit(b).unwrap();
        assert!(tracker.is_editing());
        tracker.draft_mut().status = Status::Offer;
        tracker.draft_mut().notes = "call back\nmonday".to_string();
        assert_eq!(tracker.submit_form().unwrap(), b);

        assert!(!tracker.is_editing());
        let companies: Vec<&str> = tracker.records().iter().map(|r| r.company.as_str()).collect();
        assert_eq!(companies, ["Acme", "Globex", "Initech"]);
        let edited = tracker.record(b).unwrap();
        assert_eq!(edited.status, Status::Offer);
        assert_eq!(edited.notes, "call back\nmonday");
    }

    #[test]
    fn test_start_edit_unknown_id() {
        let Fixture { mut tracker, .. } = fixture();
        assert!(matches!(
            tracker.start_edit(RecordId(99)),
            Err(ValidationError::UnknownRecord(RecordId(99)))
        ));
        assert!(!tracker.is_editing());
    }

    #[test]
    fn test_cancel_edit_clears_draft() {
        let Fixture { mut tracker, .. } = fixture();
        let a = add(&mut tracker, "Acme", "Eng");
        tracker.start_edit(a).unwrap();
        tracker.cancel_edit();
        assert!(!tracker.is_editing());
        assert_eq!(tracker.draft(), &Draft::default());
    }

    #[test]
    fn test_delete_keeps_others_in_order() {
        let Fixture { mut tracker, .. } = fixture();
        let a = add(&mut tracker, "Acme", "Eng");
        let b = add(&mut tracker, "Globex", "Ops");
        let c = add(&mut tracker, "Initech", "QA");
        let before = tracker.records().to_vec();

        assert!(tracker.delete(b));
        assert!(tracker.record(b).is_none());
        assert_eq!(tracker.records(), &[before[0].clone(), before[2].clone()][..]);
        assert_eq!(tracker.records()[0].id, a);
        assert_eq!(tracker.records()[1].id, c);

        assert!(!tracker.delete(b));
    }

    #[test]
    fn test_delete_edited_record_exits_edit_mode() {
        let Fixture { mut tracker, .. } = fixture();
        let a = add(&mut tracker, "Acme", "Eng");
        let b = add(&mut tracker, "Globex", "Ops");

        tracker.start_edit(a).unwrap();
        tracker.delete(b);
        assert!(tracker.is_editing());

        tracker.delete(a);
        assert!(!tracker.is_editing());
        assert_eq!(tracker.draft(), &Draft::default());
    }

    #[test]
    fn test_import_appends_without_touching_existing() {
        let Fixture { mut tracker, .. } = fixture();
        let a = add(&mut tracker, "Acme", "Eng");
        let before = tracker.records().to_vec();

        let rows = vec![
            Record {
                id: a,
                company: "Acme".to_string(),
                position: "Eng".to_string(),
                ..Default::default()
            },
            Record {
                id: RecordId(1000),
                company: "Hooli".to_string(),
                position: "PM".to_string(),
                ..Default::default()
            },
        ];
        assert_eq!(tracker.import_rows(rows).unwrap(), 2);

        assert_eq!(tracker.records().len(), 3);
        assert_eq!(&tracker.records()[..1], &before[..]);
        // Same content is still a new record with its own id
        let ids: HashSet<RecordId> = tracker.records().iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(tracker.records()[2].company, "Hooli");
    }

    #[test]
    fn test_import_csv_is_all_or_nothing() {
        let Fixture { mut tracker, .. } = fixture();
        add(&mut tracker, "Acme", "Eng");

        let bad = "company,position\n\"Hooli\",\"PM\"\n\"Broken";
        assert!(tracker.import_csv(bad).is_err());
        assert_eq!(tracker.records().len(), 1);

        let good = "company,position,notes\n\"Hooli\",\"PM\",\"a\\nb\"";
        assert_eq!(tracker.import_csv(good).unwrap(), 1);
        assert_eq!(tracker.records()[1].notes, "a\nb");
    }

    #[test]
    fn test_export_then_import_duplicates_collection() {
        let Fixture { mut tracker, .. } = fixture();
        add(&mut tracker, "Acme, Inc.", "Eng \"II\"");
        let exported = tracker.export_csv();

        tracker.import_csv(&exported).unwrap();
        let records = tracker.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].company, "Acme, Inc.");
        assert_eq!(records[1].position, "Eng \"II\"");
        assert_ne!(records[0].id, records[1].id);
    }

    #[test]
    fn test_clear_all_requires_confirmation() {
        let Fixture { local, mut tracker, .. } = fixture();
        add(&mut tracker, "Acme", "Eng");

        assert!(!tracker.clear_all(|_| false).unwrap());
        assert_eq!(tracker.records().len(), 1);

        let mut asked_with = 0;
        assert!(
            tracker
                .clear_all(|count| {
                    asked_with = count;
                    true
                })
                .unwrap()
        );
        assert_eq!(asked_with, 1);
        assert!(tracker.records().is_empty());
        // Written without waiting on the queue
        assert_eq!(local.get(LOCAL_KEY).unwrap(), None);
    }

    #[test]
    fn test_clear_all_signed_in_empties_remote() {
        let Fixture { local, remote, mut tracker } = fixture();
        tracker.apply_identity(Some(Identity::new("u1"))).unwrap();
        add(&mut tracker, "Acme", "Eng");
        tracker.flush().unwrap();
        local.set(LOCAL_KEY, "[]").unwrap();

        tracker.clear_all(|_| true).unwrap();
        assert!(remote.document("u1").unwrap().items.is_empty());
        assert_eq!(local.get(LOCAL_KEY).unwrap(), None);
    }

    #[test]
    fn test_sign_in_falls_back_to_local_records() {
        let Fixture { local, remote, mut tracker } = fixture();
        add(&mut tracker, "Acme", "Eng");
        add(&mut tracker, "Globex", "Ops");
        tracker.flush().unwrap();
        let local_records = saved_locally(&local);

        // Fresh remote document with zero items
        remote.put("u1", &Document::default()).unwrap();
        tracker.apply_identity(Some(Identity::new("u1"))).unwrap();
        assert_eq!(tracker.records(), &local_records[..]);

        // The next mutation lands remotely, local stays as it was
        add(&mut tracker, "Initech", "QA");
        tracker.flush().unwrap();
        assert_eq!(remote.document("u1").unwrap().items.len(), 3);
        assert_eq!(saved_locally(&local).len(), 2);
    }

    #[test]
    fn test_ids_stay_unique_after_reload() {
        let Fixture { local, mut tracker, .. } = fixture();
        let stored = vec![Record {
            id: RecordId(41),
            company: "Acme".to_string(),
            position: "Eng".to_string(),
            ..Default::default()
        }];
        local
            .set(LOCAL_KEY, &serde_json::to_string(&stored).unwrap())
            .unwrap();

        tracker.apply_identity(None).unwrap();
        let id = add(&mut tracker, "Globex", "Ops");
        assert_eq!(id, RecordId(42));
    }

    #[test]
    fn test_failed_remote_save_is_surfaced() {
        let Fixture { remote, mut tracker, .. } = fixture();
        tracker.apply_identity(Some(Identity::new("u1"))).unwrap();
        remote.set_failing(true);

        add(&mut tracker, "Acme", "Eng");
        assert!(matches!(tracker.flush(), Err(PersistenceError::Remote(_))));
        // In-memory state is still usable and the error is reported once
        assert_eq!(tracker.records().len(), 1);
        assert!(tracker.flush().is_ok());

        remote.set_failing(false);
        add(&mut tracker, "Globex", "Ops");
        tracker.flush().unwrap();
        assert_eq!(remote.document("u1").unwrap().items.len(), 2);
    }

    #[test]
    fn test_failed_load_leaves_state_unchanged() {
        let Fixture { remote, mut tracker, .. } = fixture();
        add(&mut tracker, "Acme", "Eng");
        remote.set_failing(true);

        assert!(tracker.apply_identity(Some(Identity::new("u1"))).is_err());
        assert_eq!(tracker.identity(), None);
        assert_eq!(tracker.records().len(), 1);
        assert_eq!(tracker.target(), StorageTarget::Local);
    }

    #[test]
    fn test_sync_identity_follows_session_provider() {
        let Fixture { local, remote, mut tracker } = fixture();
        remote
            .put(
                "u1",
                &Document {
                    items: vec![Record {
                        id: RecordId(7),
                        company: "Remote Co".to_string(),
                        position: "Eng".to_string(),
                        ..Default::default()
                    }],
                },
            )
            .unwrap();

        let mut provider = SessionProvider::restore(local.clone()).unwrap();
        let events = provider.subscribe();
        assert!(tracker.sync_identity(&events).unwrap());
        assert!(tracker.identity().is_none());

        provider.sign_in("u1", None).unwrap();
        assert!(tracker.sync_identity(&events).unwrap());
        assert_eq!(tracker.identity().map(|i| i.uid.as_str()), Some("u1"));
        assert_eq!(tracker.records()[0].company, "Remote Co");

        assert!(!tracker.sync_identity(&events).unwrap());

        provider.sign_out().unwrap();
        tracker.sync_identity(&events).unwrap();
        assert!(tracker.records().is_empty());
    }

    #[test]
    fn test_set_status() {
        let Fixture { mut tracker, .. } = fixture();
        let a = add(&mut tracker, "Acme", "Eng");
        tracker.set_status(a, Status::Interviewing).unwrap();
        assert_eq!(tracker.record(a).unwrap().status, Status::Interviewing);
        assert!(tracker.set_status(RecordId(99), Status::Offer).is_err());
    }

    #[test]
    fn test_largest_id_does_not_wrap() {
        let Fixture { local, mut tracker, .. } = fixture();
        let stored = vec![Record {
            id: RecordId(u64::MAX),
            company: "Acme".to_string(),
            position: "Eng".to_string(),
            ..Default::default()
        }];
        local
            .set(LOCAL_KEY, &serde_json::to_string(&stored).unwrap())
            .unwrap();
        tracker.apply_identity(None).unwrap();

        tracker.draft_mut().company = "Globex".to_string();
        tracker.draft_mut().position = "Ops".to_string();
        assert!(matches!(tracker.submit_form(), Err(ValidationError::IdsExhausted)));

        let rows = vec![Record {
            company: "Hooli".to_string(),
            position: "PM".to_string(),
            ..Default::default()
        }];
        assert!(tracker.import_rows(rows).is_err());
        assert!(matches!(
            tracker.import_csv("company,position\n\"Hooli\",\"PM\""),
            Err(ImportError::Validation(ValidationError::IdsExhausted))
        ));
        assert_eq!(tracker.records(), &stored[..]);
    }

    #[test]
    fn test_sign_out_works_after_failed_session_restore() {
        let Fixture { local, remote, mut tracker } = fixture();
        let stored = vec![Record {
            id: RecordId(1),
            company: "Local Co".to_string(),
            position: "Eng".to_string(),
            ..Default::default()
        }];
        local
            .set(LOCAL_KEY, &serde_json::to_string(&stored).unwrap())
            .unwrap();
        {
            let mut earlier = SessionProvider::restore(local.clone()).unwrap();
            earlier.sign_in("u1", None).unwrap();
        }

        remote.set_failing(true);
        let mut provider = SessionProvider::restore(local.clone()).unwrap();
        let events = provider.subscribe();
        assert!(tracker.sync_identity(&events).is_err());
        assert!(tracker.identity().is_none());

        provider.sign_out().unwrap();
        assert!(tracker.sync_identity(&events).unwrap());
        assert_eq!(tracker.records(), &stored[..]);
        assert_eq!(tracker.target(), StorageTarget::Local);
    }
}
