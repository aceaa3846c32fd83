//! In-memory source for tests.
//!
//! Tables hold rows in insertion order, which is the "natural" order an
//! unordered window reads. Ordered windows sort on the ordering column,
//! comparing with [`Watermark::compare`].

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use rowsync_core::{
    CellValue, ColumnDescriptor, LowerBound, RowFilter, RowQuery,
    SourceConnector, SourceError, SourceResult, SourceRow, SourceType,
    Watermark,
};
use tokio::sync::Mutex;

#[derive(Debug, Default, Clone)]
struct MemTable {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<SourceRow>,
}

impl MemTable {
    fn column_type(&self, column: &str) -> SourceResult<SourceType> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
            .map(|c| c.source_type)
            .ok_or_else(|| SourceError::Schema {
                details: format!("unknown column {column}").into(),
            })
    }

    fn key(&self, row: &SourceRow, column: &str) -> SourceResult<Option<Watermark>> {
        let ty = self.column_type(column)?;
        let cell = row
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, cell)| cell.clone())
            .unwrap_or(CellValue::Null);
        Ok(Watermark::from_cell(ty, cell))
    }
}

#[derive(Debug, Default)]
pub struct MemSource {
    tables: Mutex<HashMap<String, MemTable>>,
    queries: Mutex<Vec<RowQuery>>,
}

impl MemSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_table(&self, table: &str, columns: Vec<ColumnDescriptor>) {
        self.tables.lock().await.insert(
            table.to_owned(),
            MemTable {
                columns,
                rows: Vec::new(),
            },
        );
    }

    pub async fn append_rows(&self, table: &str, rows: Vec<SourceRow>) {
        if let Some(t) = self.tables.lock().await.get_mut(table) {
            t.rows.extend(rows);
        }
    }

    /// Every window requested so far, in order.
    pub async fn queries(&self) -> Vec<RowQuery> {
        self.queries.lock().await.clone()
    }
}

fn not_found(table: &str) -> SourceError {
    SourceError::NotFound {
        details: format!("table {table}").into(),
    }
}

fn passes(key: Option<&Watermark>, bound: &Watermark, lower: LowerBound) -> bool {
    match key {
        None => false,
        Some(k) => match (k.compare(bound), lower) {
            (Ordering::Greater, _) => true,
            (Ordering::Equal, LowerBound::Inclusive) => true,
            _ => false,
        },
    }
}

#[async_trait]
impl SourceConnector for MemSource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn count_rows(
        &self,
        table: &str,
        filter: Option<&RowFilter>,
    ) -> SourceResult<u64> {
        let tables = self.tables.lock().await;
        let t = tables.get(table).ok_or_else(|| not_found(table))?;
        let Some(f) = filter else {
            return Ok(t.rows.len() as u64);
        };

        let mut n = 0u64;
        for row in &t.rows {
            if passes(t.key(row, &f.column)?.as_ref(), &f.value, f.bound) {
                n += 1;
            }
        }
        Ok(n)
    }

    async fn max_value(
        &self,
        table: &str,
        column: &str,
    ) -> SourceResult<CellValue> {
        let tables = self.tables.lock().await;
        let t = tables.get(table).ok_or_else(|| not_found(table))?;
        let mut best: Option<(Watermark, CellValue)> = None;

        for row in &t.rows {
            let Some(key) = t.key(row, column)? else {
                continue;
            };
            let replace = best
                .as_ref()
                .is_none_or(|(b, _)| key.compare(b).is_gt());
            if replace {
                let cell = row
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(column))
                    .map(|(_, c)| c.clone())
                    .unwrap_or(CellValue::Null);
                best = Some((key, cell));
            }
        }

        Ok(best.map(|(_, c)| c).unwrap_or(CellValue::Null))
    }

    async fn list_columns(
        &self,
        table: &str,
    ) -> SourceResult<Vec<ColumnDescriptor>> {
        self.tables
            .lock()
            .await
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| not_found(table))
    }

    async fn query_rows(
        &self,
        table: &str,
        query: &RowQuery,
    ) -> SourceResult<Vec<SourceRow>> {
        self.queries.lock().await.push(query.clone());
        let tables = self.tables.lock().await;
        let t = tables.get(table).ok_or_else(|| not_found(table))?;
        let (offset, limit) = (query.offset as usize, query.limit as usize);

        let Some(col) = &query.order_by else {
            return Ok(t.rows.iter().skip(offset).take(limit).cloned().collect());
        };

        let mut keyed = Vec::with_capacity(t.rows.len());
        for row in &t.rows {
            let key = t.key(row, col)?;
            let keep = match &query.after {
                Some(wm) => passes(key.as_ref(), wm, LowerBound::Exclusive),
                None => true,
            };
            if keep {
                keyed.push((key, row));
            }
        }
        // stable sort keeps insertion order among equal keys
        keyed.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => a.compare(b),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        Ok(keyed
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(id: i64, day: &str) -> SourceRow {
        vec![
            ("id".into(), CellValue::Int(id)),
            ("day".into(), CellValue::text(day)),
        ]
    }

    async fn source() -> MemSource {
        let src = MemSource::new();
        src.create_table(
            "events",
            vec![
                ColumnDescriptor::new("id", SourceType::BigInt),
                ColumnDescriptor::new("day", SourceType::Date),
            ],
        )
        .await;
        src.append_rows(
            "events",
            vec![
                row(3, "2024-01-06"),
                row(1, "2024-01-04"),
                row(10, "2024-01-05"),
                row(2, "2024-01-05"),
            ],
        )
        .await;
        src
    }

    fn ids(rows: &[SourceRow]) -> Vec<CellValue> {
        rows.iter().map(|r| r[0].1.clone()).collect()
    }

    #[tokio::test]
    async fn counts_with_bounds() {
        let src = source().await;
        let wm = Watermark::new("2024-01-05");

        assert_eq!(src.count_rows("events", None).await.unwrap(), 4);
        assert_eq!(
            src.count_rows("events", Some(&RowFilter::after("day", wm.clone())))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            src.count_rows("events", Some(&RowFilter::from("day", wm)))
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn max_compares_numbers_numerically() {
        let src = source().await;
        assert_eq!(
            src.max_value("events", "id").await.unwrap(),
            CellValue::Int(10)
        );
        assert_eq!(
            src.max_value("events", "day").await.unwrap(),
            CellValue::text("2024-01-06")
        );
    }

    #[tokio::test]
    async fn ordered_window_after_watermark() {
        let src = source().await;
        let q = RowQuery::window(0, 10)
            .ordered_by("day")
            .after(Some(Watermark::new("2024-01-04")));
        let rows = src.query_rows("events", &q).await.unwrap();
        assert_eq!(
            ids(&rows),
            vec![CellValue::Int(10), CellValue::Int(2), CellValue::Int(3)]
        );
        assert_eq!(src.queries().await, vec![q]);
    }

    #[tokio::test]
    async fn natural_window_keeps_insertion_order() {
        let src = source().await;
        let rows = src
            .query_rows("events", &RowQuery::window(1, 2))
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![CellValue::Int(1), CellValue::Int(10)]);
    }

    #[tokio::test]
    async fn missing_table_is_not_found() {
        let src = MemSource::new();
        let err = src.count_rows("nope", None).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }
}
