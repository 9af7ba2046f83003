//! Stored rows and row queries.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Identity of a row: unique per collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    /// Collection (table) name.
    pub collection: String,
    /// Record id, unique within the collection.
    pub id: String,
}

impl RowKey {
    /// Creates a new row key.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// A single row as held by a backend.
///
/// The backend only looks at `collection`, `id`, `request_time` and `status`
/// to index, filter and order rows. `body` is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Collection (table) name.
    pub collection: String,
    /// Record id, unique within the collection.
    pub id: String,
    /// Ordering timestamp.
    pub request_time: i64,
    /// Numeric sync status code.
    pub status: u8,
    /// Encoded record body.
    pub body: Vec<u8>,
}

impl StoredRow {
    /// Creates a new stored row.
    pub fn new(
        collection: impl Into<String>,
        id: impl Into<String>,
        request_time: i64,
        status: u8,
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

    /// Returns the key of this row.
    pub fn key(&self) -> RowKey {
        RowKey::new(self.collection.clone(), self.id.clone())
    }
}

/// Field a query orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    /// Order by request time, ties broken by id.
    #[default]
    RequestTime,
    /// Order by id.
    Id,
}

/// Direction of a query ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Oldest / smallest first.
    #[default]
    Ascending,
    /// Newest / largest first.
    Descending,
}

/// A filtered, ordered read over one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    /// Collection to read.
    pub collection: String,
    /// Only rows with this status code, if set.
    pub status: Option<u8>,
    /// Ordering field.
    pub order_by: SortField,
    /// Ordering direction.
    pub direction: SortDirection,
    /// Maximum number of rows returned.
    pub limit: Option<usize>,
}

impl RowQuery {
    /// Creates a query over every row of a collection, oldest first.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            status: None,
            order_by: SortField::RequestTime,
            direction: SortDirection::Ascending,
            limit: None,
        }
    }

    /// Restricts the query to one status code.
    #[must_use]
    pub fn with_status(mut self, status: u8) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the ordering.
    #[must_use]
    pub fn order_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.order_by = field;
        self.direction = direction;
        self
    }

    /// Limits the number of rows returned.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `row` passes the filter.
    pub fn matches(&self, row: &StoredRow) -> bool {
        row.collection == self.collection && self.status.map_or(true, |s| row.status == s)
    }

    /// Filters, orders and limits a set of rows.
    pub fn apply<'a, I>(&self, rows: I) -> Vec<StoredRow>
    where
        I: IntoIterator<Item = &'a StoredRow>,
    {
        let mut matched: Vec<StoredRow> = rows
            .into_iter()
            .filter(|row| self.matches(row))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let ord = self.compare(a, b);
            match self.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }

    fn compare(&self, a: &StoredRow, b: &StoredRow) -> Ordering {
        match self.order_by {
            SortField::RequestTime => a
                .request_time
                .cmp(&b.request_time)
                .then_with(|| a.id.cmp(&b.id)),
            SortField::Id => a.id.cmp(&b.id),
        }
    }
}
