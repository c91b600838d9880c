//! In-memory backend connection for tests.
//!
//! [`MemoryConnection`] behaves like the backend kind it is constructed
//! with: revision kinds enforce optimistic concurrency and acknowledge with
//! `{ok, id, rev}`, view-row kinds wrap listings in `{id, key, value, doc}`
//! rows, filter kinds accept simple `field = value AND ...` expressions and
//! cursor kinds page through continuation tokens. Bulk calls are refused on
//! kinds without batch support.
//!
//! Tests can inject write failures, expire the session and inspect how many
//! primitive calls the adapter layer made.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::connection::{
    record_key, BackendConnection, BackendResult, BulkOutcome, FetchPage, FetchRequest,
    FieldInfo, NativeQuery, Record,
};
use crate::error::BackendError;
use crate::kind::BackendKind;
use crate::query::{compare_values, parse_order, project};

/// Number of primitive calls made against a [`MemoryConnection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub select_collection: usize,
    pub fetch_one: usize,
    pub fetch_many: usize,
    pub store: usize,
    pub store_many: usize,
    pub remove: usize,
    pub remove_many: usize,
}

#[derive(Debug, Clone)]
struct StoredDoc {
    id: Value,
    rev: u64,
    body: Record,
}

#[derive(Debug, Default)]
struct Collection {
    docs: BTreeMap<String, StoredDoc>,
    properties: Record,
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, Collection>,
    fields: HashMap<String, Vec<FieldInfo>>,
    failing_ids: HashSet<String>,
    writes_before_failure: Option<usize>,
    session_expired: bool,
    session_revoked: bool,
    refreshes: usize,
    calls: CallCounts,
}

/// In-memory [`BackendConnection`] mimicking a given [`BackendKind`].
#[derive(Debug)]
pub struct MemoryConnection {
    kind: BackendKind,
    state: Mutex<State>,
}

impl MemoryConnection {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            state: Mutex::new(State::default()),
        }
    }

    /// Add an empty collection.
    pub fn with_collection(self, name: &str) -> Self {
        self.state()
            .collections
            .entry(name.to_string())
            .or_default();
        self
    }

    /// Publish fixed field metadata for a collection (creating it if needed).
    pub fn with_fields(self, collection: &str, fields: Vec<FieldInfo>) -> Self {
        {
            let mut state = self.state();
            state.collections.entry(collection.to_string()).or_default();
            state.fields.insert(collection.to_string(), fields);
        }
        self
    }

    /// Reject every write touching `id`.
    pub fn fail_writes_for(&self, id: impl Into<Value>) {
        self.state().failing_ids.insert(record_key(&id.into()));
    }

    /// Accept `n` more record writes, then reject all further writes.
    pub fn fail_writes_after(&self, n: usize) {
        self.state().writes_before_failure = Some(n);
    }

    /// Stop injecting write failures.
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_ids.clear();
        state.writes_before_failure = None;
    }

    /// Make every call fail with HTTP 401 until the session is refreshed.
    pub fn expire_session(&self) {
        self.state().session_expired = true;
    }

    /// Expire the session and make refreshing ineffective.
    pub fn revoke_session(&self) {
        let mut state = self.state();
        state.session_expired = true;
        state.session_revoked = true;
    }

    pub fn refresh_count(&self) -> usize {
        self.state().refreshes
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Current native form of a stored record.
    pub fn document(&self, collection: &str, id: impl Into<Value>) -> Option<Record> {
        let key = record_key(&id.into());
        let state = self.state();
        state
            .collections
            .get(collection)
            .and_then(|c| c.docs.get(&key))
            .map(|doc| self.materialize(doc))
    }

    /// Number of records in a collection (0 when it does not exist).
    pub fn len(&self, collection: &str) -> usize {
        self.state()
            .collections
            .get(collection)
            .map(|c| c.docs.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_session(&self, state: &State) -> BackendResult<()> {
        if state.session_expired {
            return Err(BackendError::Rest {
                status: 401,
                code: "INVALID_SESSION_ID".to_string(),
                message: "Session expired or invalid".to_string(),
            });
        }
        Ok(())
    }

    fn materialize(&self, doc: &StoredDoc) -> Record {
        let mut out = Record::new();
        out.insert(self.kind.id_field().to_string(), doc.id.clone());
        if let Some(rev_field) = self.kind.revision_field() {
            out.insert(rev_field.to_string(), Value::String(doc.rev.to_string()));
        }
        for (k, v) in &doc.body {
            out.insert(k.clone(), v.clone());
        }
        out
    }

    fn view_row(&self, doc: &StoredDoc, include_docs: bool) -> Record {
        let mut row = Record::new();
        row.insert("id".to_string(), doc.id.clone());
        row.insert("key".to_string(), doc.id.clone());
        row.insert("value".to_string(), json!({ "rev": doc.rev.to_string() }));
        if include_docs {
            row.insert("doc".to_string(), Value::Object(self.materialize(doc)));
        }
        row
    }

    fn ack(&self, id: &Value, rev: u64) -> Record {
        let ack = if self.kind.capabilities().revisions {
            json!({ "ok": true, "id": id, "rev": rev.to_string() })
        } else {
            json!({ "id": id, "success": true, "errors": [] })
        };
        match ack {
            Value::Object(map) => map,
            _ => Record::new(),
        }
    }

    fn check_write_allowed(state: &mut State, key: &str) -> BackendResult<()> {
        if state.failing_ids.contains(key) {
            return Err(BackendError::Query(format!("write rejected for '{key}'")));
        }
        if let Some(remaining) = state.writes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(BackendError::Query(format!("write rejected for '{key}'")));
            }
            *remaining -= 1;
        }
        Ok(())
    }

    fn supplied_revision(&self, record: &Record) -> Option<String> {
        let field = self.kind.revision_field()?;
        match record.get(field)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn store_locked(
        &self,
        state: &mut State,
        collection: &str,
        mut record: Record,
    ) -> BackendResult<Record> {
        let id_field = self.kind.id_field();
        let id = match record.remove(id_field) {
            Some(Value::Null) | None => Value::String(uuid::Uuid::new_v4().simple().to_string()),
            Some(id) => id,
        };
        let key = record_key(&id);
        let supplied = self.supplied_revision(&record);
        if let Some(rev_field) = self.kind.revision_field() {
            record.remove(rev_field);
        }

        let docs = &state
            .collections
            .get(collection)
            .ok_or_else(|| BackendError::CollectionNotFound(collection.to_string()))?
            .docs;
        let current = docs.get(&key).map(|d| d.rev);
        if self.kind.capabilities().revisions {
            if let Some(current) = current {
                if supplied.as_deref() != Some(current.to_string().as_str()) {
                    return Err(BackendError::RevisionConflict {
                        id: key,
                        expected: supplied.unwrap_or_else(|| "none".to_string()),
                        actual: current.to_string(),
                    });
                }
            }
        }

        Self::check_write_allowed(state, &key)?;

        let rev = current.map(|r| r + 1).unwrap_or(1);
        let docs = &mut state
            .collections
            .get_mut(collection)
            .ok_or_else(|| BackendError::CollectionNotFound(collection.to_string()))?
            .docs;
        docs.insert(
            key,
            StoredDoc {
                id: id.clone(),
                rev,
                body: record,
            },
        );
        Ok(self.ack(&id, rev))
    }

    fn remove_locked(
        &self,
        state: &mut State,
        collection: &str,
        record: &Record,
    ) -> BackendResult<Record> {
        let id = record
            .get(self.kind.id_field())
            .or_else(|| record.get("id"))
            .cloned()
            .ok_or_else(|| BackendError::Query("record identifier missing".to_string()))?;
        let key = record_key(&id);
        let supplied = self.supplied_revision(record);

        let docs = &state
            .collections
            .get(collection)
            .ok_or_else(|| BackendError::CollectionNotFound(collection.to_string()))?
            .docs;
        let current = docs
            .get(&key)
            .map(|d| d.rev)
            .ok_or_else(|| BackendError::RecordNotFound {
                collection: collection.to_string(),
                id: key.clone(),
            })?;
        if let Some(supplied) = supplied {
            if supplied != current.to_string() {
                return Err(BackendError::RevisionConflict {
                    id: key,
                    expected: supplied,
                    actual: current.to_string(),
                });
            }
        }

        Self::check_write_allowed(state, &key)?;

        if let Some(c) = state.collections.get_mut(collection) {
            c.docs.remove(&key);
        }
        Ok(self.ack(&id, current + 1))
    }

    fn query_locked(
        &self,
        state: &State,
        collection: &str,
        query: &NativeQuery,
    ) -> BackendResult<FetchPage> {
        let caps = self.kind.capabilities();
        let coll = state
            .collections
            .get(collection)
            .ok_or_else(|| BackendError::CollectionNotFound(collection.to_string()))?;

        let clauses = match query.filter.as_deref().map(str::trim) {
            Some(filter) if !filter.is_empty() => {
                if !caps.filter {
                    return Err(BackendError::Unsupported("filter".to_string()));
                }
                parse_filter(filter)?
            }
            _ => Vec::new(),
        };

        let mut matched: Vec<(Record, &StoredDoc)> = coll
            .docs
            .values()
            .map(|doc| (self.materialize(doc), doc))
            .filter(|(native, _)| clauses.iter().all(|c| c.matches(native)))
            .collect();
        if let Some((field, descending)) = query.order.as_deref().and_then(parse_order) {
            matched.sort_by(|(a, _), (b, _)| {
                let ord = compare_values(a.get(field), b.get(field));
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let total = matched.len() as u64;
        let mut offset = query.offset;
        if caps.cursor {
            if let Some(cursor) = query.cursor.as_deref() {
                offset = parse_cursor(collection, cursor)?;
            }
        }
        let page: Vec<(Record, &StoredDoc)> = matched
            .into_iter()
            .skip(offset as usize)
            .take(query.limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .collect();

        let end = offset + page.len() as u64;
        let next = (caps.cursor && end < total).then(|| format!("{collection}-{end}"));

        let rows = page
            .into_iter()
            .map(|(native, doc)| {
                if caps.view_rows {
                    self.view_row(doc, query.include_docs)
                } else {
                    match &query.fields {
                        Some(fields) => project(&native, self.kind.id_field(), fields),
                        None => native,
                    }
                }
            })
            .collect();

        Ok(FetchPage {
            rows,
            total: Some(total),
            offset,
            next,
        })
    }
}

#[async_trait]
impl BackendConnection for MemoryConnection {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn select_collection(&self, name: &str) -> BackendResult<()> {
        let mut state = self.state();
        state.calls.select_collection += 1;
        self.check_session(&state)?;
        if state.collections.contains_key(name) {
            Ok(())
        } else {
            Err(BackendError::CollectionNotFound(name.to_string()))
        }
    }

    async fn fetch_one(&self, collection: &str, id: &Value) -> BackendResult<Option<Record>> {
        let mut state = self.state();
        state.calls.fetch_one += 1;
        self.check_session(&state)?;
        let coll = state
            .collections
            .get(collection)
            .ok_or_else(|| BackendError::CollectionNotFound(collection.to_string()))?;
        Ok(coll.docs.get(&record_key(id)).map(|d| self.materialize(d)))
    }

    async fn fetch_many(
        &self,
        collection: &str,
        request: FetchRequest,
    ) -> BackendResult<FetchPage> {
        let mut state = self.state();
        state.calls.fetch_many += 1;
        self.check_session(&state)?;
        match request {
            FetchRequest::Ids { ids, include_docs } => {
                let coll = state
                    .collections
                    .get(collection)
                    .ok_or_else(|| BackendError::CollectionNotFound(collection.to_string()))?;
                let rows: Vec<Record> = ids
                    .iter()
                    .filter_map(|id| coll.docs.get(&record_key(id)))
                    .map(|doc| {
                        if self.kind.capabilities().view_rows {
                            self.view_row(doc, include_docs)
                        } else {
                            self.materialize(doc)
                        }
                    })
                    .collect();
                Ok(FetchPage {
                    total: Some(rows.len() as u64),
                    rows,
                    offset: 0,
                    next: None,
                })
            }
            FetchRequest::Query(query) => self.query_locked(&state, collection, &query),
        }
    }

    async fn store(&self, collection: &str, record: Record) -> BackendResult<Record> {
        let mut state = self.state();
        state.calls.store += 1;
        self.check_session(&state)?;
        self.store_locked(&mut state, collection, record)
    }

    async fn store_many(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> BackendResult<BulkOutcome> {
        let mut state = self.state();
        state.calls.store_many += 1;
        self.check_session(&state)?;
        if !self.kind.capabilities().batch {
            return Err(BackendError::Unsupported(format!(
                "bulk store on {}",
                self.kind.label()
            )));
        }
        Ok(records
            .into_iter()
            .map(|record| self.store_locked(&mut state, collection, record))
            .collect())
    }

    async fn remove(&self, collection: &str, record: Record) -> BackendResult<Record> {
        let mut state = self.state();
        state.calls.remove += 1;
        self.check_session(&state)?;
        self.remove_locked(&mut state, collection, &record)
    }

    async fn remove_many(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> BackendResult<BulkOutcome> {
        let mut state = self.state();
        state.calls.remove_many += 1;
        self.check_session(&state)?;
        if !self.kind.capabilities().batch {
            return Err(BackendError::Unsupported(format!(
                "bulk delete on {}",
                self.kind.label()
            )));
        }
        Ok(records
            .iter()
            .map(|record| self.remove_locked(&mut state, collection, record))
            .collect())
    }

    async fn list_collections(&self) -> BackendResult<Vec<String>> {
        let state = self.state();
        self.check_session(&state)?;
        Ok(state.collections.keys().cloned().collect())
    }

    async fn describe_collection(&self, name: &str) -> BackendResult<Record> {
        let state = self.state();
        self.check_session(&state)?;
        let coll = state
            .collections
            .get(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        let mut info = coll.properties.clone();
        info.insert("doc_count".to_string(), json!(coll.docs.len()));
        Ok(info)
    }

    async fn fields(&self, collection: &str) -> BackendResult<Option<Vec<FieldInfo>>> {
        let state = self.state();
        self.check_session(&state)?;
        Ok(state.fields.get(collection).cloned())
    }

    async fn create_collection(&self, name: &str, properties: &Record) -> BackendResult<()> {
        let mut state = self.state();
        self.check_session(&state)?;
        if !self.kind.capabilities().metadata_mutation {
            return Err(BackendError::Unsupported(format!("create collection '{name}'")));
        }
        if state.collections.contains_key(name) {
            return Err(BackendError::CollectionExists(name.to_string()));
        }
        state.collections.insert(
            name.to_string(),
            Collection {
                docs: BTreeMap::new(),
                properties: properties.clone(),
            },
        );
        Ok(())
    }

    async fn update_collection(&self, name: &str, properties: &Record) -> BackendResult<()> {
        let mut state = self.state();
        self.check_session(&state)?;
        if !self.kind.capabilities().metadata_mutation {
            return Err(BackendError::Unsupported(format!("update collection '{name}'")));
        }
        let coll = state
            .collections
            .get_mut(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        for (k, v) in properties {
            coll.properties.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> BackendResult<()> {
        let mut state = self.state();
        self.check_session(&state)?;
        if !self.kind.capabilities().metadata_mutation {
            return Err(BackendError::Unsupported(format!("delete collection '{name}'")));
        }
        state
            .collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        state.fields.remove(name);
        Ok(())
    }

    async fn refresh_session(&self) -> BackendResult<()> {
        let mut state = self.state();
        state.refreshes += 1;
        if !state.session_revoked {
            state.session_expired = false;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Filter expressions
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    field: String,
    negated: bool,
    value: Value,
}

impl Clause {
    fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        let equal = compare_values(Some(actual), Some(&self.value)) == Ordering::Equal;
        equal != self.negated
    }
}

fn malformed(message: String) -> BackendError {
    BackendError::Rest {
        status: 400,
        code: "MALFORMED_QUERY".to_string(),
        message,
    }
}

/// Parse `field = value [AND field != value ...]`.
fn parse_filter(filter: &str) -> BackendResult<Vec<Clause>> {
    let mut clauses = Vec::new();
    let mut rest = filter;
    loop {
        let (clause, tail) = match find_and(rest) {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 5..])),
            None => (rest, None),
        };
        clauses.push(parse_clause(clause.trim())?);
        match tail {
            Some(t) => rest = t,
            None => break,
        }
    }
    Ok(clauses)
}

fn find_and(s: &str) -> Option<usize> {
    let upper = s.to_ascii_uppercase();
    let mut in_quote = false;
    for (i, ch) in upper.char_indices() {
        if ch == '\'' {
            in_quote = !in_quote;
        } else if !in_quote && upper[i..].starts_with(" AND ") {
            return Some(i);
        }
    }
    None
}

fn parse_clause(clause: &str) -> BackendResult<Clause> {
    let (field, negated, raw) = if let Some((f, v)) = clause.split_once("!=") {
        (f, true, v)
    } else if let Some((f, v)) = clause.split_once('=') {
        (f, false, v)
    } else {
        return Err(malformed(format!("unexpected token in '{clause}'")));
    };
    let field = field.trim();
    if field.is_empty() || field.contains(char::is_whitespace) {
        return Err(malformed(format!("invalid field in '{clause}'")));
    }
    let raw = raw.trim();
    let value = if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        Value::String(raw[1..raw.len() - 1].to_string())
    } else if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else {
        serde_json::from_str(raw)
            .map_err(|_| malformed(format!("invalid value in '{clause}'")))?
    };
    Ok(Clause {
        field: field.to_string(),
        negated,
        value,
    })
}

fn parse_cursor(collection: &str, cursor: &str) -> BackendResult<u64> {
    cursor
        .strip_prefix(collection)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| BackendError::Rest {
            status: 400,
            code: "INVALID_QUERY_LOCATOR".to_string(),
            message: format!("invalid query locator '{cursor}'"),
        })
}
