//! Reshapes a flat walk result into `{index → {column → value}}` tables and
//! derived views (§4.8).

use std::collections::BTreeMap;

use crate::oid::Oid;
use crate::varbind::{Value, VarBind};

/// `index` is either a single integer or an integer sequence (§3); keep the
/// full sequence so multi-arc indices (e.g. `ipAddrTable`'s dotted IP index)
/// round-trip without collapsing to a single `u32`.
pub type Index = Vec<u32>;

/// `map<index, map<column, value>>` (§3's `TableView`).
#[derive(Debug, Clone, Default)]
pub struct TableView {
    pub rows: BTreeMap<Index, BTreeMap<u32, Value>>,
}

/// Reshapes `flat` (a walk result rooted at or beyond `table_oid`) into rows.
/// Filter predicate (§4.8): `oid` must extend `T` by at least
/// `[1, column, index...]` — length ≥ `|T| + 3` after stripping `T`'s own
/// prefix of length `|T|`, i.e. the stripped tail has at least 2 elements
/// beyond the mandatory leading `1` (entry sub-index).
pub fn to_table(flat: &[VarBind], table_oid: &Oid) -> TableView {
    let mut view = TableView::default();

    for vb in flat {
        let Some(tail) = vb.oid.strip_prefix(table_oid) else { continue };
        // tail = [1, column, index...]
        if tail.len() < 3 || tail[0] != 1 {
            continue;
        }
        let column = tail[1];
        let index: Index = tail[2..].to_vec();
        view.rows.entry(index).or_default().insert(column, vb.value.clone());
    }

    view
}

/// Reverses `to_table`: flattens rows back into `(index, column, value)`
/// triples sorted by index then column — the round-trip property in §8.
pub fn to_rows(table: &TableView) -> Vec<(Index, u32, Value)> {
    let mut out = Vec::new();
    for (index, cols) in &table.rows {
        for (&col, value) in cols {
            out.push((index.clone(), col, value.clone()));
        }
    }
    out
}

impl TableView {
    pub fn row(&self, index: &Index) -> Option<&BTreeMap<u32, Value>> {
        self.rows.get(index)
    }

    pub fn column(&self, column: u32) -> BTreeMap<Index, Value> {
        self.rows
            .iter()
            .filter_map(|(idx, cols)| cols.get(&column).map(|v| (idx.clone(), v.clone())))
            .collect()
    }

    pub fn indices(&self) -> Vec<Index> {
        self.rows.keys().cloned().collect()
    }

    /// Re-keys rows by the value of `key_column` instead of the raw table
    /// index — e.g. reindexing `ifTable` by `ifDescr` instead of `ifIndex`.
    pub fn rekey_by_column(&self, key_column: u32) -> BTreeMap<String, BTreeMap<u32, Value>> {
        let mut out = BTreeMap::new();
        for cols in self.rows.values() {
            if let Some(key_value) = cols.get(&key_column) {
                out.insert(key_value.display_string(), cols.clone());
            }
        }
        out
    }

    /// Fraction of rows that have a value for every column observed anywhere
    /// in the table — a crude completeness signal for a partial walk.
    pub fn completeness_ratio(&self) -> f64 {
        if self.rows.is_empty() {
            return 1.0;
        }
        let all_columns: std::collections::BTreeSet<u32> =
            self.rows.values().flat_map(|cols| cols.keys().copied()).collect();
        if all_columns.is_empty() {
            return 1.0;
        }
        let complete = self
            .rows
            .values()
            .filter(|cols| all_columns.iter().all(|c| cols.contains_key(c)))
            .count();
        complete as f64 / self.rows.len() as f64
    }

    /// `to_table` silently overwrites a column value if the same
    /// `(index, column)` pair appears twice in the source flat list; this
    /// scans the flat input directly to flag which indices collided.
    pub fn duplicate_indices_in(flat: &[VarBind], table_oid: &Oid) -> Vec<Index> {
        let mut seen = std::collections::HashMap::<(Index, u32), u32>::new();
        let mut dups = Vec::new();
        for vb in flat {
            let Some(tail) = vb.oid.strip_prefix(table_oid) else { continue };
            if tail.len() < 3 || tail[0] != 1 {
                continue;
            }
            let column = tail[1];
            let index: Index = tail[2..].to_vec();
            let count = seen.entry((index.clone(), column)).or_insert(0);
            *count += 1;
            if *count == 2 {
                dups.push(index);
            }
        }
        dups
    }

    /// Per-column numeric stats (count/sum/avg/min/max) over whatever values
    /// in that column can be interpreted as a number.
    pub fn column_stats(&self, column: u32) -> ColumnStats {
        let values: Vec<f64> = self
            .rows
            .values()
            .filter_map(|cols| cols.get(&column))
            .filter_map(numeric_value)
            .collect();

        if values.is_empty() {
            return ColumnStats::default();
        }
        let sum: f64 = values.iter().sum();
        let count = values.len();
        ColumnStats {
            count,
            sum,
            avg: sum / count as f64,
            min: values.iter().cloned().fold(f64::INFINITY, f64::min),
            max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// Best-effort type inference for a column: the `VarType` shared by every
    /// present value, or `None` if the column is empty or mixed-typed.
    pub fn column_type(&self, column: u32) -> Option<crate::varbind::VarType> {
        let mut kinds = self.rows.values().filter_map(|cols| cols.get(&column)).map(Value::var_type);
        let first = kinds.next()?;
        if kinds.all(|k| k == first) {
            Some(first)
        } else {
            None
        }
    }

    /// Sorts indices by a column's numeric value (non-numeric/missing values
    /// sort last, stable among themselves).
    pub fn sorted_by_column(&self, column: u32) -> Vec<Index> {
        let mut indices = self.indices();
        indices.sort_by(|a, b| {
            let va = self.row(a).and_then(|c| c.get(&column)).and_then(numeric_value);
            let vb = self.row(b).and_then(|c| c.get(&column)).and_then(numeric_value);
            match (va, vb) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap(),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
        indices
    }

    /// Groups indices by the display-string value of `column`.
    pub fn group_by_column(&self, column: u32) -> BTreeMap<String, Vec<Index>> {
        let mut groups = BTreeMap::new();
        for (index, cols) in &self.rows {
            if let Some(v) = cols.get(&column) {
                groups.entry(v.display_string()).or_insert_with(Vec::new).push(index.clone());
            }
        }
        groups
    }

    /// Streams rows as they become complete (Design Notes §9's `table_stream`
    /// open question): a row is emitted only once every column observed
    /// *anywhere* in `flat` for that index has been collected, replacing the
    /// stub `update_table_buffer` that always returned an empty chunk.
    pub fn rows_as_completed(flat: &[VarBind], table_oid: &Oid) -> Vec<(Index, BTreeMap<u32, Value>)> {
        let mut expected_columns = std::collections::BTreeSet::new();
        let mut parsed = Vec::new();

        for vb in flat {
            let Some(tail) = vb.oid.strip_prefix(table_oid) else { continue };
            if tail.len() < 3 || tail[0] != 1 {
                continue;
            }
            let column = tail[1];
            let index: Index = tail[2..].to_vec();
            expected_columns.insert(column);
            parsed.push((index, column, vb.value.clone()));
        }

        let mut partial: BTreeMap<Index, BTreeMap<u32, Value>> = BTreeMap::new();
        let mut emitted = std::collections::BTreeSet::new();
        let mut completed = Vec::new();

        for (index, column, value) in parsed {
            let row = partial.entry(index.clone()).or_default();
            row.insert(column, value);
            if !emitted.contains(&index) && expected_columns.iter().all(|c| row.contains_key(c)) {
                emitted.insert(index.clone());
                completed.push((index, row.clone()));
            }
        }

        // Walk termination: emit whatever never fully completed, matching
        // the "or on walk termination" clause of the open question.
        for (index, row) in partial {
            if !emitted.contains(&index) {
                completed.push((index, row));
            }
        }

        completed
    }
}

fn numeric_value(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(n) => Some(*n as f64),
        Value::Unsigned32(n) | Value::Counter32(n) | Value::Gauge32(n) => Some(*n as f64),
        Value::Counter64(n) => Some(*n as f64),
        Value::TimeTicks(n) => Some(*n as f64),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnStats {
    pub count: usize,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn synthetic_if_table() -> (Oid, Vec<VarBind>) {
        let table_oid = Oid::from_str("1.3.6.1.2.1.2.2").unwrap();
        let flat = vec![
            VarBind::new(Oid::from_str("1.3.6.1.2.1.2.2.1.2.1").unwrap(), Value::OctetString(b"eth0".to_vec())),
            VarBind::new(Oid::from_str("1.3.6.1.2.1.2.2.1.2.2").unwrap(), Value::OctetString(b"eth1".to_vec())),
            VarBind::new(Oid::from_str("1.3.6.1.2.1.2.2.1.8.1").unwrap(), Value::Integer(1)),
            VarBind::new(Oid::from_str("1.3.6.1.2.1.2.2.1.8.2").unwrap(), Value::Integer(2)),
        ];
        (table_oid, flat)
    }

    #[test]
    fn to_table_groups_by_index() {
        let (table_oid, flat) = synthetic_if_table();
        let table = to_table(&flat, &table_oid);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.row(&vec![1]).unwrap().get(&2), Some(&Value::OctetString(b"eth0".to_vec())));
    }

    #[test]
    fn to_table_then_to_rows_round_trips() {
        let (table_oid, flat) = synthetic_if_table();
        let table = to_table(&flat, &table_oid);
        let rows = to_rows(&table);
        assert_eq!(rows.len(), flat.len());

        let mut direct: Vec<(Index, u32, Value)> = flat
            .iter()
            .map(|vb| {
                let tail = vb.oid.strip_prefix(&table_oid).unwrap();
                (tail[2..].to_vec(), tail[1], vb.value.clone())
            })
            .collect();
        let mut rows = rows;
        direct.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        rows.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        assert_eq!(rows, direct);
    }

    #[test]
    fn completeness_ratio_reflects_partial_rows() {
        let (table_oid, mut flat) = synthetic_if_table();
        flat.pop(); // drop ifAdminStatus.2, leaving row 2 incomplete
        let table = to_table(&flat, &table_oid);
        assert!(table.completeness_ratio() < 1.0);
    }

    #[test]
    fn rows_as_completed_emits_once_all_columns_present() {
        let (table_oid, flat) = synthetic_if_table();
        let completed = TableView::rows_as_completed(&flat, &table_oid);
        assert_eq!(completed.len(), 2);
        for (_, cols) in &completed {
            assert_eq!(cols.len(), 2);
        }
    }

    #[test]
    fn column_stats_computes_numeric_summary() {
        let (table_oid, flat) = synthetic_if_table();
        let table = to_table(&flat, &table_oid);
        let stats = table.column_stats(8);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.sum, 3.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 2.0);
    }
}
