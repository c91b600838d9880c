//! Record shaping between callers and backends.
//!
//! [`RecordCodec`] prepares caller records for writing (field filtering,
//! field security, required-field checks) and cleans backend-native results
//! into the generic shape: identifier and revision under their canonical
//! names, plus the projected fields.
//!
//! Stored documents keep every field except the declared identifier and
//! revision. Write acknowledgements and view rows are envelopes: only the
//! identity they carry survives [`RecordCodec::identity_of`].

use dfbridge_backend::{FieldInfo, Record};
use serde_json::Value;

use crate::descriptor::CollectionDescriptor;
use crate::error::{AdapterError, AdapterResult};
use crate::options::{FieldSecurity, FieldSelection};

/// Lower-case identifier alias found in acknowledgements and view rows.
const ID_ALIAS: &str = "id";
/// Lower-case revision alias found in acknowledgements.
const REV_ALIAS: &str = "rev";

/// Converts records for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCodec {
    id_field: String,
    revision_field: Option<String>,
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

impl RecordCodec {
    pub fn new(id_field: impl Into<String>, revision_field: Option<String>) -> Self {
        Self {
            id_field: id_field.into(),
            revision_field,
        }
    }

    pub fn for_descriptor(descriptor: &CollectionDescriptor) -> Self {
        Self::new(
            descriptor.id_field.clone(),
            descriptor.revision_field.clone(),
        )
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn revision_field(&self) -> Option<&str> {
        self.revision_field.as_deref()
    }

    fn is_identity_name(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.id_field)
            || self
                .revision_field
                .as_deref()
                .is_some_and(|rf| name.eq_ignore_ascii_case(rf))
    }

    /// Filter a caller record down to writable fields.
    ///
    /// With field metadata, keys are matched case-insensitively and renamed
    /// to the canonical field name; read-only fields are dropped. Denied
    /// fields are always dropped and forced values applied afterwards.
    /// Required fields are only enforced on create.
    pub fn prepare_for_write(
        &self,
        record: &Record,
        fields: Option<&[FieldInfo]>,
        security: &FieldSecurity,
        for_update: bool,
    ) -> AdapterResult<Record> {
        let mut parsed = Record::new();
        for (key, value) in record {
            if security.is_denied(key) {
                continue;
            }
            match fields {
                Some(fields) => {
                    if let Some(info) = fields.iter().find(|f| f.name.eq_ignore_ascii_case(key)) {
                        if !info.read_only {
                            parsed.insert(info.name.clone(), value.clone());
                        }
                    }
                }
                None => {
                    parsed.insert(key.clone(), value.clone());
                }
            }
        }

        if parsed.is_empty() {
            return Err(AdapterError::bad_request(
                "No valid fields were found in record.",
            ));
        }

        for (key, value) in &security.force {
            parsed.insert(key.clone(), value.clone());
        }

        if !for_update {
            for info in fields.unwrap_or_default() {
                if info.required && !info.read_only && non_null(parsed.get(&info.name)).is_none()
                {
                    return Err(AdapterError::bad_request(format!(
                        "Required field '{}' can not be NULL.",
                        info.name
                    )));
                }
            }
        }

        Ok(parsed)
    }

    /// Identifier of a native record: the identifier field, then `id`.
    pub fn identifier_of(&self, native: &Record) -> Option<Value> {
        non_null(native.get(&self.id_field))
            .or_else(|| non_null(native.get(ID_ALIAS)))
            .cloned()
    }

    /// Revision of a native record: the revision field, then `rev`, then
    /// `value.rev`. Always `None` on backends without revisions.
    pub fn revision_of(&self, native: &Record) -> Option<Value> {
        let field = self.revision_field.as_deref()?;
        non_null(native.get(field))
            .or_else(|| non_null(native.get(REV_ALIAS)))
            .or_else(|| non_null(native.get("value").and_then(|v| v.get(REV_ALIAS))))
            .cloned()
    }

    /// Identifier and revision under their declared names only.
    pub fn declared_identity(&self, record: &Record) -> (Option<Value>, Option<Value>) {
        let id = non_null(record.get(&self.id_field)).cloned();
        let rev = self
            .revision_field
            .as_deref()
            .and_then(|rf| non_null(record.get(rf)))
            .cloned();
        (id, rev)
    }

    /// The identity carried by an acknowledgement or view row, under the
    /// canonical names. Envelope keys (`ok`, `success`, `errors`, `key`,
    /// `value`) are dropped.
    pub fn identity_of(&self, envelope: &Record) -> Record {
        let mut out = Record::new();
        if let Some(id) = self.identifier_of(envelope) {
            self.attach_identifiers(&mut out, &id, self.revision_of(envelope).as_ref());
        }
        out
    }

    /// Shape a stored document for the caller.
    ///
    /// The `id` and `rev` aliases only stand in for identity when the
    /// declared field is absent; otherwise they are ordinary fields.
    pub fn clean(&self, native: &Record, selection: &FieldSelection) -> Record {
        let mut out = Record::new();
        if let Some(id) = self.identifier_of(native) {
            out.insert(self.id_field.clone(), id);
        }
        if let (Some(field), Some(rev)) = (self.revision_field.as_ref(), self.revision_of(native)) {
            out.insert(field.clone(), rev);
        }

        let (declared_id, declared_rev) = self.declared_identity(native);
        let id_from_alias = declared_id.is_none();
        let rev_from_alias = self.revision_field.is_some() && declared_rev.is_none();
        let consumed = |name: &str| {
            self.is_identity_name(name)
                || (id_from_alias && name.eq_ignore_ascii_case(ID_ALIAS))
                || (rev_from_alias && name.eq_ignore_ascii_case(REV_ALIAS))
        };

        match selection {
            FieldSelection::IdOnly => {}
            FieldSelection::All => {
                for (key, value) in native {
                    if consumed(key.as_str()) {
                        continue;
                    }
                    out.insert(key.clone(), value.clone());
                }
            }
            FieldSelection::List(names) => {
                for name in names {
                    let name = name.trim();
                    if name.is_empty()
                        || consumed(name)
                        || out.keys().any(|k| k.eq_ignore_ascii_case(name))
                    {
                        continue;
                    }
                    match native.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                        Some((key, value)) => out.insert(key.clone(), value.clone()),
                        None => out.insert(name.to_string(), Value::Null),
                    };
                }
            }
        }
        out
    }

    /// Clean every row. With `use_doc` the rows are view rows: the
    /// embedded `doc` is cleaned when present, otherwise only the row's
    /// identity is kept.
    pub fn clean_many(
        &self,
        natives: &[Record],
        selection: &FieldSelection,
        use_doc: bool,
    ) -> Vec<Record> {
        natives
            .iter()
            .map(|native| match native.get("doc") {
                _ if !use_doc => self.clean(native, selection),
                Some(Value::Object(doc)) => self.clean(doc, selection),
                _ => self.identity_of(native),
            })
            .collect()
    }

    /// Remove the identifier and revision from a caller record.
    pub fn strip_identifiers(&self, record: &mut Record) -> (Option<Value>, Option<Value>) {
        let id = record.remove(&self.id_field).filter(|v| !v.is_null());
        let rev = self
            .revision_field
            .as_ref()
            .and_then(|rf| record.remove(rf))
            .filter(|v| !v.is_null());
        (id, rev)
    }

    /// Place identifier and revision under their canonical names.
    pub fn attach_identifiers(&self, record: &mut Record, id: &Value, rev: Option<&Value>) {
        record.insert(self.id_field.clone(), id.clone());
        if let (Some(rf), Some(rev)) = (self.revision_field.as_ref(), rev) {
            record.insert(rf.clone(), rev.clone());
        }
    }

    /// Whether a projection needs more than identifier and revision.
    pub fn requires_more_fields(&self, selection: &FieldSelection) -> bool {
        match selection {
            FieldSelection::IdOnly => false,
            FieldSelection::All => true,
            FieldSelection::List(names) => names.iter().any(|n| !self.is_identity_name(n.trim())),
        }
    }
}

/// Submitted record overlaid by the backend acknowledgement.
pub fn merge_submitted(submitted: &Record, ack: &Record) -> Record {
    let mut merged = submitted.clone();
    for (key, value) in ack {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Stored record with the fields of a partial update applied.
pub fn merge_patch(existing: &Record, patch: &Record) -> Record {
    merge_submitted(existing, patch)
}
