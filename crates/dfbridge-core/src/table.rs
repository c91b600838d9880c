//! Table (record) operations over one backend connection.
//!
//! [`TableAdapter`] is the entry point for record requests. It resolves the
//! collection descriptor, turns the request into [`BatchUnit`]s and lets a
//! per-request [`BatchCoordinator`] run them.

use std::sync::Arc;

use dfbridge_backend::{
    BackendConnection, BackendKind, Capabilities, FetchRequest, NativeQuery, Record,
};
use serde_json::Value;
use tracing::{debug, info, Instrument};

use crate::batch::{BatchCoordinator, BatchPolicy, BatchUnit, Verb};
use crate::codec::RecordCodec;
use crate::descriptor::{CollectionDescriptor, DescriptorCache};
use crate::error::{AdapterError, AdapterResult};
use crate::obs;
use crate::options::{FieldSelection, RequestOptions};
use crate::response::{Response, ResponseMeta};

/// Record operations over the collections of one connection.
pub struct TableAdapter<C: ?Sized> {
    connection: Arc<C>,
    cache: Arc<DescriptorCache>,
}

impl<C: ?Sized> Clone for TableAdapter<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<C> TableAdapter<C>
where
    C: BackendConnection + ?Sized,
{
    pub fn new(connection: Arc<C>) -> Self {
        Self::with_cache(connection, Arc::new(DescriptorCache::new()))
    }

    /// Share a descriptor cache, typically with a [`SchemaAdapter`](crate::SchemaAdapter).
    pub fn with_cache(connection: Arc<C>, cache: Arc<DescriptorCache>) -> Self {
        Self { connection, cache }
    }

    pub fn kind(&self) -> BackendKind {
        self.connection.kind()
    }

    fn capabilities(&self) -> Capabilities {
        self.kind().capabilities()
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn cache(&self) -> &Arc<DescriptorCache> {
        &self.cache
    }

    /// Forget the cached descriptor of `collection`.
    pub async fn refresh(&self, collection: &str) {
        self.cache.invalidate(collection).await;
    }

    fn filter_unsupported(&self) -> AdapterError {
        AdapterError::bad_request(format!(
            "SQL-like filters are not currently available for {}.",
            self.kind().label()
        ))
    }

    fn require_filter_support(&self) -> AdapterResult<()> {
        if self.capabilities().filter {
            Ok(())
        } else {
            Err(self.filter_unsupported())
        }
    }

    /// Identifier metadata of `collection`.
    ///
    /// `id_field` / `id_type` overrides are honoured only on backends
    /// without a fixed identifier convention.
    pub async fn get_ids_info(
        &self,
        collection: &str,
        options: &RequestOptions,
    ) -> AdapterResult<Arc<CollectionDescriptor>> {
        let collection = collection.trim();
        if collection.is_empty() {
            return Err(AdapterError::bad_request("Table name can not be empty."));
        }

        let kind = self.kind();
        let connection = &self.connection;
        let base = self
            .cache
            .get_or_resolve(collection, || async move {
                connection.select_collection(collection).await?;
                let fields = connection.fields(collection).await?;
                Ok::<_, AdapterError>(
                    CollectionDescriptor::for_kind(collection, kind).with_fields(fields),
                )
            })
            .await?;

        if kind.capabilities().fixed_identifier
            || (options.id_field.is_none() && options.id_type.is_none())
        {
            return Ok(base);
        }

        let mut custom = (*base).clone();
        if let Some(id_field) = options.id_field.as_deref().map(str::trim) {
            if !id_field.is_empty() {
                custom.id_field = id_field.to_string();
            }
        }
        if let Some(id_type) = options.id_type {
            custom.id_type = id_type;
        }
        Ok(Arc::new(custom))
    }

    async fn run_batch(
        &self,
        descriptor: Arc<CollectionDescriptor>,
        verb: Verb,
        units: Vec<BatchUnit>,
        options: &RequestOptions,
        single: bool,
    ) -> AdapterResult<Response> {
        if units.is_empty() {
            return Err(AdapterError::bad_request(
                "There are no record sets in the request.",
            ));
        }
        let span = obs::batch_span(&descriptor.name, verb.as_str());
        let policy = BatchPolicy::from_options(options, single);
        let mut coordinator =
            BatchCoordinator::new(self.connection.as_ref(), descriptor, verb, options);
        let result = coordinator
            .execute(units, &policy)
            .instrument(span)
            .await?;
        Ok(Response::new(result.into_records()))
    }

    fn units_from_ids(
        descriptor: &CollectionDescriptor,
        ids: Vec<Value>,
        record: Option<&Record>,
    ) -> AdapterResult<Vec<BatchUnit>> {
        ids.iter()
            .map(|id| {
                let unit = BatchUnit::id(descriptor.id_type.coerce(id)?);
                Ok(match record {
                    Some(record) => unit.with_record(record.clone()),
                    None => unit,
                })
            })
            .collect()
    }

    fn units_from_records(
        descriptor: &CollectionDescriptor,
        records: Vec<Record>,
    ) -> AdapterResult<Vec<BatchUnit>> {
        let codec = RecordCodec::for_descriptor(descriptor);
        records
            .into_iter()
            .map(|record| {
                let (id, revision) = codec.declared_identity(&record);
                let id = id.map(|id| descriptor.id_type.coerce(&id)).transpose()?;
                let mut unit = BatchUnit::record(record).with_revision(revision);
                unit.id = id;
                Ok(unit)
            })
            .collect()
    }

    fn single_record(response: Response) -> AdapterResult<Record> {
        response
            .into_first()
            .ok_or_else(|| AdapterError::InternalServerError("Empty result.".to_string()))
    }

    // ------------------------------------------------------------------------
    // Retrieve
    // ------------------------------------------------------------------------

    /// List records, optionally selected by a native filter expression.
    pub async fn retrieve_by_filter(
        &self,
        collection: &str,
        filter: Option<&str>,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        let filter = filter.map(str::trim).filter(|f| !f.is_empty());
        let caps = self.capabilities();
        if filter.is_some() && !caps.filter {
            return Err(self.filter_unsupported());
        }

        let descriptor = self.get_ids_info(collection, options).await?;
        let codec = RecordCodec::for_descriptor(&descriptor);
        let selection = options.effective_fields();
        let include_docs = options.include_docs || codec.requires_more_fields(&selection);

        let projection = |mut names: Vec<String>| {
            names.extend(codec.revision_field().map(str::to_string));
            Some(names)
        };
        let query = NativeQuery {
            filter: filter.map(str::to_string),
            fields: match &selection {
                FieldSelection::List(names) if !caps.view_rows => projection(names.clone()),
                FieldSelection::IdOnly if !caps.view_rows => projection(Vec::new()),
                _ => None,
            },
            order: options.order.clone(),
            offset: options.offset,
            limit: options.limit,
            include_docs,
            design: options.design.clone(),
            view: options.view.clone(),
            cursor: options.next.clone(),
        };
        debug!(collection = %descriptor.name, ?query, "retrieve by filter");

        let page = self
            .connection
            .fetch_many(&descriptor.name, FetchRequest::Query(query))
            .await
            .map_err(|e| {
                AdapterError::wrap(
                    &format!("Failed to filter items from '{}'.", descriptor.name),
                    e.into(),
                )
            })?;

        let resource = codec.clean_many(&page.rows, &selection, caps.view_rows);
        let meta = ResponseMeta {
            count: if options.include_count || page.offset != 0 {
                page.total
            } else {
                None
            },
            next: page.next,
        };
        Ok(Response::new(resource).with_meta(meta))
    }

    pub async fn retrieve_by_ids(
        &self,
        collection: &str,
        ids: Vec<Value>,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let units = Self::units_from_ids(&descriptor, ids, None)?;
        self.run_batch(descriptor, Verb::Get, units, options, false)
            .await
    }

    pub async fn retrieve_by_id(
        &self,
        collection: &str,
        id: Value,
        options: &RequestOptions,
    ) -> AdapterResult<Record> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let units = Self::units_from_ids(&descriptor, vec![id], None)?;
        let response = self
            .run_batch(descriptor, Verb::Get, units, options, true)
            .await?;
        Self::single_record(response)
    }

    // ------------------------------------------------------------------------
    // Create / replace / patch
    // ------------------------------------------------------------------------

    pub async fn create(
        &self,
        collection: &str,
        records: Vec<Record>,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let single = records.len() == 1;
        let units = records.into_iter().map(BatchUnit::record).collect();
        self.run_batch(descriptor, Verb::Post, units, options, single)
            .await
    }

    /// Replace records addressed by the identifier each one carries.
    pub async fn replace(
        &self,
        collection: &str,
        records: Vec<Record>,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let single = records.len() == 1;
        let units = Self::units_from_records(&descriptor, records)?;
        self.run_batch(descriptor, Verb::Put, units, options, single)
            .await
    }

    /// Replace every record in `ids` with `updates`.
    pub async fn replace_by_ids(
        &self,
        collection: &str,
        ids: Vec<Value>,
        updates: &Record,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let units = Self::units_from_ids(&descriptor, ids, Some(updates))?;
        self.run_batch(descriptor, Verb::Put, units, options, false)
            .await
    }

    /// Merge each record's fields into the stored record it identifies.
    pub async fn patch(
        &self,
        collection: &str,
        records: Vec<Record>,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let single = records.len() == 1;
        let units = Self::units_from_records(&descriptor, records)?;
        self.run_batch(descriptor, Verb::Patch, units, options, single)
            .await
    }

    pub async fn patch_by_ids(
        &self,
        collection: &str,
        ids: Vec<Value>,
        updates: &Record,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let units = Self::units_from_ids(&descriptor, ids, Some(updates))?;
        self.run_batch(descriptor, Verb::Patch, units, options, false)
            .await
    }

    pub async fn patch_by_id(
        &self,
        collection: &str,
        id: Value,
        updates: &Record,
        options: &RequestOptions,
    ) -> AdapterResult<Record> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let units = Self::units_from_ids(&descriptor, vec![id], Some(updates))?;
        let response = self
            .run_batch(descriptor, Verb::Patch, units, options, true)
            .await?;
        Self::single_record(response)
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    /// Delete the records identified by each record's identifier.
    pub async fn delete(
        &self,
        collection: &str,
        records: Vec<Record>,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let single = records.len() == 1;
        let units = Self::units_from_records(&descriptor, records)?
            .into_iter()
            .map(|unit| BatchUnit {
                record: None,
                ..unit
            })
            .collect();
        self.run_batch(descriptor, Verb::Delete, units, options, single)
            .await
    }

    pub async fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<Value>,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let units = Self::units_from_ids(&descriptor, ids, None)?;
        self.run_batch(descriptor, Verb::Delete, units, options, false)
            .await
    }

    pub async fn delete_by_id(
        &self,
        collection: &str,
        id: Value,
        options: &RequestOptions,
    ) -> AdapterResult<Record> {
        let descriptor = self.get_ids_info(collection, options).await?;
        let units = Self::units_from_ids(&descriptor, vec![id], None)?;
        let response = self
            .run_batch(descriptor, Verb::Delete, units, options, true)
            .await?;
        Self::single_record(response)
    }

    // ------------------------------------------------------------------------
    // Filter variants
    // ------------------------------------------------------------------------

    /// Identifiers of every record matching `filter`, across cursor pages.
    async fn filtered_ids(
        &self,
        descriptor: &CollectionDescriptor,
        filter: Option<&str>,
    ) -> AdapterResult<Vec<Value>> {
        let codec = RecordCodec::for_descriptor(descriptor);
        let mut ids = Vec::new();
        let mut cursor = None;
        loop {
            let query = NativeQuery {
                filter: filter.map(str::to_string),
                fields: Some(Vec::new()),
                cursor: cursor.take(),
                ..NativeQuery::default()
            };
            let page = self
                .connection
                .fetch_many(&descriptor.name, FetchRequest::Query(query))
                .await
                .map_err(|e| {
                    AdapterError::wrap(
                        &format!("Failed to filter items from '{}'.", descriptor.name),
                        e.into(),
                    )
                })?;
            ids.extend(page.rows.iter().filter_map(|row| codec.identifier_of(row)));
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(ids),
            }
        }
    }

    async fn by_filter(
        &self,
        verb: Verb,
        collection: &str,
        filter: Option<&str>,
        updates: Option<&Record>,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        self.require_filter_support()?;
        let filter = filter.map(str::trim).filter(|f| !f.is_empty());
        if verb == Verb::Delete && filter.is_none() {
            return Err(AdapterError::bad_request(
                "Filter can not be empty; use truncate to delete every record.",
            ));
        }

        let descriptor = self.get_ids_info(collection, options).await?;
        let ids = self.filtered_ids(&descriptor, filter).await?;
        if ids.is_empty() {
            return Ok(Response::default());
        }
        let units = Self::units_from_ids(&descriptor, ids, updates)?;
        self.run_batch(descriptor, verb, units, options, false)
            .await
    }

    /// Replace every record matching `filter` with `updates`.
    pub async fn update_by_filter(
        &self,
        collection: &str,
        filter: Option<&str>,
        updates: &Record,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        self.by_filter(Verb::Put, collection, filter, Some(updates), options)
            .await
    }

    pub async fn patch_by_filter(
        &self,
        collection: &str,
        filter: Option<&str>,
        updates: &Record,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        self.by_filter(Verb::Patch, collection, filter, Some(updates), options)
            .await
    }

    pub async fn delete_by_filter(
        &self,
        collection: &str,
        filter: Option<&str>,
        options: &RequestOptions,
    ) -> AdapterResult<Response> {
        self.by_filter(Verb::Delete, collection, filter, None, options)
            .await
    }

    /// Delete every record of `collection`.
    pub async fn truncate(&self, collection: &str) -> AdapterResult<Record> {
        let descriptor = self.get_ids_info(collection, &RequestOptions::default()).await?;
        let name = descriptor.name.as_str();
        let wrap = |e: dfbridge_backend::BackendError| {
            AdapterError::wrap(&format!("Failed to filter items from '{name}'."), e.into())
        };

        let page = self
            .connection
            .fetch_many(
                name,
                FetchRequest::Query(NativeQuery {
                    include_docs: true,
                    ..NativeQuery::default()
                }),
            )
            .await
            .map_err(wrap)?;
        let docs: Vec<Record> = page
            .rows
            .into_iter()
            .map(|row| match row.get("doc") {
                Some(Value::Object(doc)) => doc.clone(),
                _ => row,
            })
            .collect();
        let removed = docs.len();

        if self.capabilities().batch {
            if !docs.is_empty() {
                let acks = self
                    .connection
                    .remove_many(name, docs)
                    .await
                    .map_err(wrap)?;
                for ack in acks {
                    ack.map_err(wrap)?;
                }
            }
        } else {
            for doc in docs {
                self.connection.remove(name, doc).await.map_err(wrap)?;
            }
        }

        info!(collection = name, removed, "collection truncated");
        let mut out = Record::new();
        out.insert("success".to_string(), Value::Bool(true));
        Ok(out)
    }
}
