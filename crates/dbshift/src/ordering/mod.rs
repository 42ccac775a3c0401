//! Parent-before-child ordering for self-referential tables.
//!
//! When a table has a foreign key onto itself, every referenced row must be
//! inserted before the rows that point at it. [`order_rows`] reorders an
//! in-memory row set so a single bulk insert satisfies the constraint.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use crate::config::OrderingStrategy;
use crate::core::{Row, Value};

/// Comparable form of a key value.
///
/// Integers, integral floats and decimals, and numeric strings all compare as
/// integers, so `2`, `2.0` and `"2"` are the same key. Integers sort before
/// text keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OrderKey {
    Int(i64),
    Text(String),
}

impl OrderKey {
    /// `None` for null.
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            return None;
        }
        Some(match value.as_i64() {
            Some(n) => OrderKey::Int(n),
            None => OrderKey::Text(value.to_string().trim().to_string()),
        })
    }
}

/// Reordered rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedRows {
    pub rows: Vec<Row>,
    /// Input position of each output row.
    pub positions: Vec<usize>,
    /// Rows left in a reference cycle, appended at the end.
    pub cycle_rows: usize,
}

/// Order `rows` so that a row whose `foreign_key` references another row's
/// `parent_key` comes after it.
///
/// Rows with a null or missing foreign key are roots and keep their input order
/// at the front. A foreign key that matches no row in the set, or the row
/// itself, also makes a root, placed after the null-key roots.
pub fn order_rows(
    rows: Vec<Row>,
    parent_key: &str,
    foreign_key: &str,
    strategy: OrderingStrategy,
) -> OrderedRows {
    let keys: Vec<Option<OrderKey>> = rows
        .iter()
        .map(|r| r.get_ignore_case(parent_key).and_then(OrderKey::from_value))
        .collect();
    let refs: Vec<Option<OrderKey>> = rows
        .iter()
        .map(|r| r.get_ignore_case(foreign_key).and_then(OrderKey::from_value))
        .collect();

    let (order, cycle_rows) = match strategy {
        OrderingStrategy::ForeignKeyAscending => (ascending_order(&refs), 0),
        OrderingStrategy::Topological => topological_order(&keys, &refs),
    };

    let mut slots: Vec<Option<Row>> = rows.into_iter().map(Some).collect();
    OrderedRows {
        rows: order.iter().filter_map(|&i| slots[i].take()).collect(),
        positions: order,
        cycle_rows,
    }
}

/// Roots first, then everything else by ascending foreign key.
///
/// Only correct when key order matches insertion order of the hierarchy.
fn ascending_order(refs: &[Option<OrderKey>]) -> Vec<usize> {
    let (mut order, mut rest): (Vec<usize>, Vec<usize>) =
        (0..refs.len()).partition(|&i| refs[i].is_none());
    rest.sort_by(|&a, &b| refs[a].cmp(&refs[b]));
    order.extend(rest);
    order
}

/// Kahn's algorithm over the parent/child graph.
fn topological_order(keys: &[Option<OrderKey>], refs: &[Option<OrderKey>]) -> (Vec<usize>, usize) {
    let present: HashSet<&OrderKey> = keys.iter().flatten().collect();

    let mut children: HashMap<&OrderKey, Vec<usize>> = HashMap::new();
    let mut queue = VecDeque::new();
    let mut orphans = Vec::new();
    for (i, fk) in refs.iter().enumerate() {
        match fk {
            None => queue.push_back(i),
            Some(fk) if present.contains(fk) && keys[i].as_ref() != Some(fk) => {
                children.entry(fk).or_default().push(i);
            }
            // Dangling or self-pointing keys start after the true roots.
            Some(_) => orphans.push(i),
        }
    }
    queue.extend(orphans);

    let mut emitted = vec![false; refs.len()];
    let mut order = Vec::with_capacity(refs.len());
    while let Some(i) = queue.pop_front() {
        if emitted[i] {
            continue;
        }
        emitted[i] = true;
        order.push(i);
        if let Some(key) = &keys[i] {
            if let Some(waiting) = children.remove(key) {
                queue.extend(waiting);
            }
        }
    }

    let mut stuck: Vec<usize> = (0..refs.len()).filter(|&i| !emitted[i]).collect();
    if !stuck.is_empty() {
        warn!(
            "{} rows form a reference cycle; appending them in foreign key order",
            stuck.len()
        );
        stuck.sort_by(|&a, &b| refs[a].cmp(&refs[b]));
    }
    let cycle_rows = stuck.len();
    order.extend(stuck);
    (order, cycle_rows)
}
