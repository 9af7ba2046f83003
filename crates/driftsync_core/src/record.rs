//! The record capability and its storage rows.

use crate::error::{CoreError, CoreResult};
use crate::status::SyncStatus;
use driftsync_storage::{RowKey, StoredRow};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A domain entity that can be stored locally and mirrored remotely.
///
/// A record maps itself to zero or more storage rows for a given status and
/// can be rehydrated from the row stored in its own [`Record::COLLECTION`].
/// Additional rows may live in other collections (denormalized copies); they
/// are written and deleted together with the primary row.
///
/// # Example
///
/// ```rust
/// use driftsync_core::{CoreResult, Record, Row, SyncStatus};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Note {
///     id: String,
///     request_time: i64,
///     text: String,
/// }
///
/// impl Record for Note {
///     const COLLECTION: &'static str = "notes";
///
///     fn id(&self) -> &str {
///         &self.id
///     }
///
///     fn request_time(&self) -> i64 {
///         self.request_time
///     }
///
///     fn to_rows(&self, status: SyncStatus) -> CoreResult<Vec<Row>> {
///         Ok(vec![Row::for_record(self, status)?])
///     }
///
///     fn from_row(row: &Row) -> CoreResult<Self> {
///         row.decode()
///     }
/// }
/// ```
pub trait Record: Sized {
    /// Collection holding the primary row of this record type.
    const COLLECTION: &'static str;

    /// Returns the stable, client-assigned identifier.
    fn id(&self) -> &str;

    /// Returns the ordering timestamp.
    fn request_time(&self) -> i64;

    /// Maps the record to the rows that represent it at `status`.
    ///
    /// The store stamps every returned row with `status`, so implementors
    /// need not set it consistently themselves.
    fn to_rows(&self, status: SyncStatus) -> CoreResult<Vec<Row>>;

    /// Rehydrates a record from its primary row.
    fn from_row(row: &Row) -> CoreResult<Self>;
}

/// Returns a fresh client-assigned record id.
///
/// Ids are random (uuid v4), so records created offline are addressable
/// before the remote has seen them.
#[must_use]
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A typed storage row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Collection name.
    pub collection: String,
    /// Record id.
    pub id: String,
    /// Ordering timestamp.
    pub request_time: i64,
    /// Sync status.
    pub status: SyncStatus,
    /// CBOR-encoded body.
    pub body: Vec<u8>,
}

impl Row {
    /// Creates a row from raw parts.
    pub fn new(
        collection: impl Into<String>,
        id: impl Into<String>,
        request_time: i64,
        status: SyncStatus,
        body: Vec<u8>,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            request_time,
            status,
            body,
        }
    }

    /// Creates a row whose body is `value` encoded as CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if the value cannot be serialized.
    pub fn encode<T: Serialize + ?Sized>(
        collection: impl Into<String>,
        id: impl Into<String>,
        request_time: i64,
        status: SyncStatus,
        value: &T,
    ) -> CoreResult<Self> {
        let mut body = Vec::new();
        ciborium::into_writer(value, &mut body).map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(Self::new(collection, id, request_time, status, body))
    }

    /// Creates the primary row of a serializable record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if the record cannot be serialized.
    pub fn for_record<R: Record + Serialize>(record: &R, status: SyncStatus) -> CoreResult<Self> {
        Self::encode(
            R::COLLECTION,
            record.id(),
            record.request_time(),
            status,
            record,
        )
    }

    /// Decodes the body.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordDecode`] naming this row if the body does
    /// not decode as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> CoreResult<T> {
        ciborium::from_reader(self.body.as_slice())
            .map_err(|e| CoreError::record_decode(&self.collection, &self.id, e.to_string()))
    }

    /// Returns the row with its status replaced.
    #[must_use]
    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns the key of this row.
    pub fn key(&self) -> RowKey {
        RowKey::new(self.collection.clone(), self.id.clone())
    }

    /// Converts into the backend representation.
    pub fn into_stored(self) -> StoredRow {
        StoredRow::new(
            self.collection,
            self.id,
            self.request_time,
            self.status.code(),
            self.body,
        )
    }

    /// Converts from the backend representation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidStatus`] if the stored status code is unknown.
    pub fn from_stored(row: StoredRow) -> CoreResult<Self> {
        let status = SyncStatus::from_code(row.status).ok_or(CoreError::InvalidStatus(row.status))?;
        Ok(Self {
            collection: row.collection,
            id: row.id,
            request_time: row.request_time,
            status,
            body: row.body,
        })
    }
}
