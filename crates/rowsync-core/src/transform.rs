//! Row transformation: ignore-list filtering plus per-cell coercion.
//!
//! Column names are compared case-insensitively. Both [`SchemaCatalog`]
//! and [`IgnoreList`] fold their keys to lowercase once at construction,
//! so a lookup only folds the row's field name.

use std::collections::{HashMap, HashSet};

use crate::{
    BatchRecord, ColumnDescriptor, ColumnSpec, SourceRow, SyncError,
    coerce_value,
};

/// Source columns keyed by lowercase name, in introspection order.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    columns: Vec<ColumnDescriptor>,
    by_name: HashMap<String, usize>,
}

impl SchemaCatalog {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        let by_name = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.to_lowercase(), i))
            .collect();
        Self { columns, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&i| &self.columns[i])
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Destination schema for every column not on the ignore list.
    pub fn dest_specs(&self, ignore: &IgnoreList) -> Vec<ColumnSpec> {
        self.columns
            .iter()
            .filter(|c| !ignore.contains(&c.name))
            .map(ColumnSpec::from)
            .collect()
    }
}

/// Case-insensitive set of column names to leave out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList(HashSet<String>);

impl IgnoreList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            names
                .into_iter()
                .map(|n| n.as_ref().trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.0.is_empty() && self.0.contains(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Turn one source row into a destination record.
///
/// Fails with [`SyncError::SchemaMismatch`] on a field the catalog does
/// not know; the catalog is stale and the run has to start over.
pub fn transform_row(
    row: SourceRow,
    catalog: &SchemaCatalog,
    ignore: &IgnoreList,
) -> Result<BatchRecord, SyncError> {
    let mut record = BatchRecord::new();

    for (name, cell) in row {
        if ignore.contains(&name) {
            continue;
        }
        let column =
            catalog
                .get(&name)
                .ok_or_else(|| SyncError::SchemaMismatch {
                    column: name.clone(),
                })?;
        record.insert(
            name.to_lowercase(),
            coerce_value(column.source_type, cell),
        );
    }

    Ok(record)
}
