//! Batch coordination.
//!
//! A [`BatchCoordinator`] is created per request. Units are either queued
//! for one bulk backend call at [`commit`](BatchCoordinator::commit) or
//! executed immediately, depending on the backend's bulk support and on the
//! request policy:
//!
//! - `single`, `continue` and `rollback` force per-record handling for
//!   writes, because each of them needs to observe or undo individual
//!   record outcomes.
//! - reads are queued unless `single` or `continue` is set, since bulk
//!   fetch by identifiers is available on every backend.
//!
//! While rollback is active, the coordinator keeps the snapshot needed to
//! undo each completed unit. Queues and snapshots are cleared by every
//! commit and rollback.

use std::fmt;
use std::mem;
use std::str::FromStr;
use std::sync::Arc;

use dfbridge_backend::{
    record_key, BackendConnection, BackendResult, BulkOutcome, Capabilities, FetchRequest,
    Record,
};
use serde_json::Value;
use tracing::debug;

use crate::codec::{merge_patch, merge_submitted, RecordCodec};
use crate::descriptor::CollectionDescriptor;
use crate::error::{AdapterError, AdapterResult};
use crate::obs;
use crate::options::{FieldSelection, RequestOptions};

/// Request verb shared by every unit of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Merge,
    Delete,
}

impl Verb {
    pub const fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Merge => "MERGE",
            Verb::Delete => "DELETE",
        }
    }

    /// Action named in id-count mismatch errors.
    pub const fn action(self) -> &'static str {
        match self {
            Verb::Get => "retrieve",
            Verb::Delete => "delete",
            _ => "update",
        }
    }

    const fn past_tense(self) -> &'static str {
        match self {
            Verb::Get => "retrieved",
            Verb::Post => "created",
            Verb::Put | Verb::Patch | Verb::Merge => "updated",
            Verb::Delete => "deleted",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Verb::Get),
            "POST" => Ok(Verb::Post),
            "PUT" => Ok(Verb::Put),
            "PATCH" => Ok(Verb::Patch),
            "MERGE" => Ok(Verb::Merge),
            "DELETE" => Ok(Verb::Delete),
            other => Err(AdapterError::bad_request(format!("Unknown verb '{other}'."))),
        }
    }
}

/// One record operation within a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchUnit {
    /// Caller payload (POST, PUT, PATCH, MERGE)
    pub record: Option<Record>,
    /// Identifier from request context
    pub id: Option<Value>,
    /// Revision token from request context
    pub revision: Option<Value>,
}

impl BatchUnit {
    pub fn record(record: Record) -> Self {
        Self {
            record: Some(record),
            ..Self::default()
        }
    }

    pub fn id(id: impl Into<Value>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_revision(mut self, revision: Option<Value>) -> Self {
        self.revision = revision;
        self
    }
}

/// Iteration policy of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchPolicy {
    pub rollback: bool,
    pub continue_on_error: bool,
    /// The request addresses exactly one record
    pub single: bool,
}

impl BatchPolicy {
    pub fn from_options(options: &RequestOptions, single: bool) -> Self {
        Self {
            rollback: options.rollback,
            continue_on_error: options.continue_on_error,
            single,
        }
    }

    fn forces_per_record(&self) -> bool {
        self.single || self.continue_on_error || self.rollback
    }
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchState {
    #[default]
    Idle,
    Accumulating,
    Committing,
    RollingBack,
}

/// Result of one unit: the cleaned record or the failure.
pub type UnitOutcome = Result<Record, AdapterError>;

/// Ordered outcomes of a batch; `outcomes[i]` belongs to unit `i`.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub outcomes: Vec<UnitOutcome>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_err()).count()
    }

    /// Successful records in unit order.
    pub fn into_records(self) -> Vec<Record> {
        self.outcomes.into_iter().filter_map(Result::ok).collect()
    }
}

/// Per-request batch coordinator over one collection.
pub struct BatchCoordinator<'a, C: ?Sized> {
    connection: &'a C,
    capabilities: Capabilities,
    descriptor: Arc<CollectionDescriptor>,
    codec: RecordCodec,
    verb: Verb,
    options: &'a RequestOptions,
    selection: FieldSelection,
    require_more: bool,
    state: BatchState,
    queued_records: Vec<Record>,
    queued_ids: Vec<Value>,
    rollback_records: Vec<Record>,
}

impl<'a, C> BatchCoordinator<'a, C>
where
    C: BackendConnection + ?Sized,
{
    pub fn new(
        connection: &'a C,
        descriptor: Arc<CollectionDescriptor>,
        verb: Verb,
        options: &'a RequestOptions,
    ) -> Self {
        let codec = RecordCodec::for_descriptor(&descriptor);
        let require_more = options.require_more || codec.requires_more_fields(&options.fields);
        Self {
            connection,
            capabilities: connection.kind().capabilities(),
            descriptor,
            codec,
            verb,
            options,
            selection: options.effective_fields(),
            require_more,
            state: BatchState::Idle,
            queued_records: Vec::new(),
            queued_ids: Vec::new(),
            rollback_records: Vec::new(),
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Units waiting for [`commit`](Self::commit).
    pub fn pending(&self) -> usize {
        match self.verb {
            Verb::Post | Verb::Put => self.queued_records.len(),
            _ => self.queued_ids.len(),
        }
    }

    /// Snapshots held for [`rollback`](Self::rollback).
    pub fn rollback_len(&self) -> usize {
        self.rollback_records.len()
    }

    fn collection(&self) -> &str {
        &self.descriptor.name
    }

    fn require_id(&self, unit: &BatchUnit) -> AdapterResult<Value> {
        unit.id.clone().ok_or_else(|| {
            AdapterError::bad_request("Identifying field(s) could not be determined.")
        })
    }

    fn require_record(unit: &mut BatchUnit) -> AdapterResult<Record> {
        unit.record
            .take()
            .ok_or_else(|| AdapterError::bad_request("No record found in request."))
    }

    fn prepare(&self, record: &Record, for_update: bool) -> AdapterResult<Record> {
        self.codec.prepare_for_write(
            record,
            self.descriptor.fields.as_deref(),
            &self.options.security,
            for_update,
        )
    }

    async fn fetch_existing(&self, id: &Value) -> AdapterResult<Record> {
        self.connection
            .fetch_one(self.collection(), id)
            .await?
            .ok_or_else(|| {
                AdapterError::not_found(format!(
                    "Record with identifier '{}' not found.",
                    record_key(id)
                ))
            })
    }

    /// Clean a write acknowledgement, merged over what was written when
    /// more than identifiers were requested. Identity always comes from
    /// the acknowledgement.
    fn finish_write(&self, written: &Record, ack: &Record) -> Record {
        let identity = self.codec.identity_of(ack);
        if self.require_more {
            let mut written = written.clone();
            self.codec.strip_identifiers(&mut written);
            self.codec
                .clean(&merge_submitted(&written, &identity), &self.selection)
        } else {
            self.codec.clean(&identity, &self.selection)
        }
    }

    /// Previous document carrying the revision the write just produced.
    fn snapshot_after_write(&self, mut old: Record, ack: &Record) -> Record {
        if let (Some(field), Some(rev)) = (self.codec.revision_field(), self.codec.revision_of(ack)) {
            old.insert(field.to_string(), rev);
        }
        old
    }

    /// Queue the unit, or execute it now and return the cleaned result.
    pub async fn add_unit(
        &mut self,
        mut unit: BatchUnit,
        policy: &BatchPolicy,
    ) -> AdapterResult<Option<Record>> {
        self.state = BatchState::Accumulating;
        let bulk = self.capabilities.batch && !policy.forces_per_record();

        match self.verb {
            Verb::Post => {
                let record = Self::require_record(&mut unit)?;
                let parsed = self.prepare(&record, false)?;
                if bulk {
                    self.queued_records.push(parsed);
                    return Ok(None);
                }

                let ack = self.connection.store(self.collection(), parsed.clone()).await?;
                if policy.rollback {
                    let mut created = Record::new();
                    if let Some(id) = self.codec.identifier_of(&ack) {
                        let rev = self.codec.revision_of(&ack);
                        self.codec.attach_identifiers(&mut created, &id, rev.as_ref());
                        self.rollback_records.push(created);
                    }
                }
                Ok(Some(self.finish_write(&parsed, &ack)))
            }

            Verb::Put => {
                let mut record = Self::require_record(&mut unit)?;
                self.codec.strip_identifiers(&mut record);
                let id = self.require_id(&unit)?;
                let parsed = self.prepare(&record, true)?;

                let needs_latest =
                    policy.rollback || (self.descriptor.has_revisions() && unit.revision.is_none());
                let old = if needs_latest {
                    Some(self.fetch_existing(&id).await?)
                } else {
                    None
                };
                let rev = unit
                    .revision
                    .clone()
                    .or_else(|| old.as_ref().and_then(|o| self.codec.revision_of(o)));

                let mut native = parsed;
                self.codec.attach_identifiers(&mut native, &id, rev.as_ref());
                if bulk {
                    self.queued_records.push(native);
                    return Ok(None);
                }

                let ack = self.connection.store(self.collection(), native.clone()).await?;
                if policy.rollback {
                    if let Some(old) = old {
                        let snapshot = self.snapshot_after_write(old, &ack);
                        self.rollback_records.push(snapshot);
                    }
                }
                Ok(Some(self.finish_write(&native, &ack)))
            }

            Verb::Patch | Verb::Merge => {
                let mut record = Self::require_record(&mut unit)?;
                self.codec.strip_identifiers(&mut record);
                let id = self.require_id(&unit)?;
                let parsed = self.prepare(&record, true)?;

                if bulk {
                    let mut queued = parsed;
                    queued.insert(self.codec.id_field().to_string(), id.clone());
                    self.queued_records.push(queued);
                    self.queued_ids.push(id);
                    return Ok(None);
                }

                let old = self.fetch_existing(&id).await?;
                let merged = merge_patch(&old, &parsed);
                let ack = self.connection.store(self.collection(), merged.clone()).await?;
                if policy.rollback {
                    let snapshot = self.snapshot_after_write(old, &ack);
                    self.rollback_records.push(snapshot);
                }
                Ok(Some(self.finish_write(&merged, &ack)))
            }

            Verb::Delete => {
                let id = self.require_id(&unit)?;
                if bulk {
                    self.queued_ids.push(id);
                    return Ok(None);
                }

                let old = self.fetch_existing(&id).await?;
                let ack = self.connection.remove(self.collection(), old.clone()).await?;
                let out = if self.require_more {
                    self.codec.clean(&old, &self.selection)
                } else {
                    self.codec.identity_of(&ack)
                };
                if policy.rollback {
                    self.rollback_records.push(old);
                }
                Ok(Some(out))
            }

            Verb::Get => {
                let id = self.require_id(&unit)?;
                if !policy.single && !policy.continue_on_error {
                    self.queued_ids.push(id);
                    return Ok(None);
                }

                let found = self.fetch_existing(&id).await?;
                Ok(Some(self.codec.clean(&found, &self.selection)))
            }
        }
    }

    /// Dispatch queued units in one bulk call per verb.
    ///
    /// Results are in queue order. When the backend rejects some records of
    /// the bulk call, the others stay written and the failure is an
    /// [`AdapterError::Batch`] carrying every per-record outcome. Queues and
    /// rollback state are cleared whatever the outcome.
    pub async fn commit(&mut self) -> AdapterResult<Vec<Record>> {
        let outcomes = self.commit_outcomes().await?;
        if outcomes.iter().all(Result::is_ok) {
            return Ok(outcomes.into_iter().filter_map(Result::ok).collect());
        }
        Err(AdapterError::Batch {
            message: format!("Not all records could be {}.", self.verb.past_tense()),
            outcomes,
            rolled_back: false,
        })
    }

    /// [`commit`](Self::commit) with the per-record outcomes of the bulk
    /// call. `Err` means nothing queued was written.
    async fn commit_outcomes(&mut self) -> AdapterResult<Vec<UnitOutcome>> {
        self.state = BatchState::Committing;
        let records = mem::take(&mut self.queued_records);
        let ids = mem::take(&mut self.queued_ids);
        self.rollback_records.clear();

        let result = self.dispatch(records, ids).await;
        self.state = BatchState::Idle;
        if let Ok(out) = &result {
            let written = out.iter().filter(|o| o.is_ok()).count();
            if written > 0 {
                obs::emit_batch_committed(self.collection(), self.verb.as_str(), written);
            }
        }
        result
    }

    async fn dispatch(
        &self,
        records: Vec<Record>,
        ids: Vec<Value>,
    ) -> AdapterResult<Vec<UnitOutcome>> {
        if records.is_empty() && ids.is_empty() {
            return Ok(Vec::new());
        }
        let collection = self.collection();
        debug!(collection, verb = %self.verb, records = records.len(), ids = ids.len(), "bulk dispatch");

        match self.verb {
            Verb::Post | Verb::Put => {
                let acks = self
                    .connection
                    .store_many(collection, records.clone())
                    .await?;
                self.check_count(acks.len(), records.len())?;
                Ok(self.finish_bulk(&records, acks))
            }

            Verb::Patch | Verb::Merge => {
                let docs = self.fetch_ordered(&ids).await?;
                let merged: Vec<Record> = docs
                    .iter()
                    .zip(&records)
                    .map(|(doc, patch)| merge_patch(doc, patch))
                    .collect();
                let acks = self
                    .connection
                    .store_many(collection, merged.clone())
                    .await?;
                self.check_count(acks.len(), merged.len())?;
                Ok(self.finish_bulk(&merged, acks))
            }

            Verb::Delete => {
                let docs = self.fetch_ordered(&ids).await?;
                let acks = self
                    .connection
                    .remove_many(collection, docs.clone())
                    .await?;
                self.check_count(acks.len(), docs.len())?;
                Ok(docs
                    .iter()
                    .zip(acks)
                    .map(|(doc, ack)| -> UnitOutcome {
                        let ack = ack?;
                        Ok(if self.require_more {
                            self.codec.clean(doc, &self.selection)
                        } else {
                            self.codec.identity_of(&ack)
                        })
                    })
                    .collect())
            }

            Verb::Get => {
                let docs = self.fetch_ordered(&ids).await?;
                Ok(self
                    .codec
                    .clean_many(&docs, &self.selection, false)
                    .into_iter()
                    .map(Ok)
                    .collect())
            }
        }
    }

    fn finish_bulk(&self, written: &[Record], acks: BulkOutcome) -> Vec<UnitOutcome> {
        written
            .iter()
            .zip(acks)
            .map(|(written, ack)| -> UnitOutcome {
                Ok(self.finish_write(written, &ack?))
            })
            .collect()
    }

    fn shortfall(&self) -> AdapterError {
        AdapterError::bad_request(format!(
            "Batch Error: not all requested ids were found to {}.",
            self.verb.action()
        ))
    }

    fn check_count(&self, found: usize, requested: usize) -> AdapterResult<()> {
        if found == requested {
            Ok(())
        } else {
            Err(self.shortfall())
        }
    }

    /// Full documents for `ids`, in request order.
    async fn fetch_ordered(&self, ids: &[Value]) -> AdapterResult<Vec<Record>> {
        let page = self
            .connection
            .fetch_many(
                self.collection(),
                FetchRequest::Ids {
                    ids: ids.to_vec(),
                    include_docs: true,
                },
            )
            .await?;
        let docs: Vec<Record> = page
            .rows
            .into_iter()
            .map(|row| match row.get("doc") {
                Some(Value::Object(doc)) if self.capabilities.view_rows => doc.clone(),
                _ => row,
            })
            .collect();
        self.check_count(docs.len(), ids.len())?;

        ids.iter()
            .map(|id| {
                let key = record_key(id);
                docs.iter()
                    .find(|doc| {
                        self.codec
                            .identifier_of(doc)
                            .is_some_and(|found| record_key(&found) == key)
                    })
                    .cloned()
                    .ok_or_else(|| self.shortfall())
            })
            .collect()
    }

    /// Undo every completed unit. Best effort: failures are logged and
    /// skipped. Returns whether every undo step succeeded.
    pub async fn rollback(&mut self) -> bool {
        self.state = BatchState::RollingBack;
        self.queued_records.clear();
        self.queued_ids.clear();
        let snapshots = mem::take(&mut self.rollback_records);
        let count = snapshots.len();
        let collection = self.collection();
        let mut complete = true;

        match self.verb {
            Verb::Get => {}
            Verb::Post if self.capabilities.batch => {
                let result = self.connection.remove_many(collection, snapshots).await;
                complete = Self::bulk_undone(collection, result);
            }
            Verb::Post => {
                for snapshot in snapshots {
                    if let Err(err) = self.connection.remove(collection, snapshot).await {
                        obs::emit_rollback_failed(collection, &err);
                        complete = false;
                    }
                }
            }
            _ if self.capabilities.batch => {
                let result = self.connection.store_many(collection, snapshots).await;
                complete = Self::bulk_undone(collection, result);
            }
            _ => {
                for snapshot in snapshots {
                    if let Err(err) = self.connection.store(collection, snapshot).await {
                        obs::emit_rollback_failed(collection, &err);
                        complete = false;
                    }
                }
            }
        }

        obs::emit_batch_rolled_back(collection, self.verb.as_str(), count, complete);
        self.state = BatchState::Idle;
        complete
    }

    fn bulk_undone(collection: &str, result: BackendResult<BulkOutcome>) -> bool {
        match result {
            Ok(acks) => acks.iter().fold(true, |complete, ack| match ack {
                Ok(_) => complete,
                Err(err) => {
                    obs::emit_rollback_failed(collection, err);
                    false
                }
            }),
            Err(err) => {
                obs::emit_rollback_failed(collection, &err);
                false
            }
        }
    }

    /// Run every unit under `policy` and commit the queued remainder.
    ///
    /// - rollback: the first failure undoes all completed units and the
    ///   batch fails.
    /// - continue: failures are recorded and processing goes on.
    /// - otherwise the batch halts at the first failure; earlier outcomes
    ///   are kept and later units are never attempted.
    ///
    /// A one-unit batch, or a bulk commit refused as a whole with no other
    /// outcome to report, surfaces the underlying error; any other failure
    /// is [`AdapterError::Batch`]. Records the backend rejected inside a
    /// bulk call fail their own slots while the others keep their results.
    pub async fn execute(
        &mut self,
        units: Vec<BatchUnit>,
        policy: &BatchPolicy,
    ) -> AdapterResult<BatchResult> {
        let total = units.len();
        let collection = self.descriptor.name.clone();
        let verb = self.verb.as_str();
        obs::emit_batch_started(&collection, verb, total, policy.rollback, policy.continue_on_error);

        let mut slots: Vec<Option<UnitOutcome>> = Vec::with_capacity(total);
        let mut queued_slots = Vec::new();
        let mut failed = 0usize;

        for (index, unit) in units.into_iter().enumerate() {
            match self.add_unit(unit, policy).await {
                Ok(Some(record)) => slots.push(Some(Ok(record))),
                Ok(None) => {
                    slots.push(None);
                    queued_slots.push(index);
                }
                Err(err) => {
                    obs::emit_unit_failed(&collection, verb, index, &err);
                    failed += 1;
                    if policy.rollback {
                        self.rollback().await;
                        if total == 1 {
                            return Err(err);
                        }
                        slots.push(Some(Err(err)));
                        return Err(AdapterError::Batch {
                            message: format!(
                                "Not all records could be {}. All changes rolled back.",
                                self.verb.past_tense()
                            ),
                            outcomes: slots.into_iter().flatten().collect(),
                            rolled_back: true,
                        });
                    }
                    slots.push(Some(Err(err)));
                    if !policy.continue_on_error {
                        break;
                    }
                }
            }
        }

        match self.commit_outcomes().await {
            Ok(results) => {
                for (slot, outcome) in queued_slots.iter().zip(results) {
                    if let Err(err) = &outcome {
                        obs::emit_unit_failed(&collection, verb, *slot, err);
                        failed += 1;
                    }
                    slots[*slot] = Some(outcome);
                }
            }
            Err(err) => {
                if failed == 0 && slots.iter().all(Option::is_none) {
                    return Err(err);
                }
                failed += queued_slots.len();
                for slot in &queued_slots {
                    slots[*slot] = Some(Err(err.clone()));
                }
            }
        }

        let outcomes: Vec<UnitOutcome> = slots.into_iter().flatten().collect();
        obs::emit_batch_finished(&collection, verb, total, failed);

        if failed == 0 {
            return Ok(BatchResult { outcomes });
        }
        if total == 1 {
            if let Some(Err(err)) = outcomes.into_iter().next() {
                return Err(err);
            }
            return Err(AdapterError::InternalServerError(
                "Batch failed without an outcome.".to_string(),
            ));
        }
        Err(AdapterError::Batch {
            message: format!("Not all records could be {}.", self.verb.past_tense()),
            outcomes,
            rolled_back: false,
        })
    }
}
