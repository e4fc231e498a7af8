// ABOUTME: Filtering, ordering, and keyset pagination for deployment listings.
// ABOUTME: Cursors carry the last row's ordering values, never an offset.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::StoreError;
use crate::model::{ApplicationKind, Deployment, DeploymentStatus};

/// Deployment fields that can be filtered and ordered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    ApplicationId,
    Kind,
    Status,
    CreatedAt,
    UpdatedAt,
}

/// A comparable field value. Timestamps are unix milliseconds and statuses
/// their rank, so range filters follow the lifecycle order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Str(String),
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<DeploymentStatus> for FieldValue {
    fn from(v: DeploymentStatus) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<ApplicationKind> for FieldValue {
    fn from(v: ApplicationKind) -> Self {
        FieldValue::Str(v.as_str().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    In,
    NotIn,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

#[derive(Debug, Clone)]
pub struct ListFilter {
    pub field: Field,
    pub op: Operator,
    pub values: Vec<FieldValue>,
}

impl ListFilter {
    pub fn new(field: Field, op: Operator, value: impl Into<FieldValue>) -> Self {
        Self {
            field,
            op,
            values: vec![value.into()],
        }
    }

    pub fn is_in(field: Field, values: impl IntoIterator<Item = FieldValue>) -> Self {
        Self {
            field,
            op: Operator::In,
            values: values.into_iter().collect(),
        }
    }

    pub fn not_in(field: Field, values: impl IntoIterator<Item = FieldValue>) -> Self {
        Self {
            field,
            op: Operator::NotIn,
            values: values.into_iter().collect(),
        }
    }

    pub(crate) fn matches(&self, d: &Deployment) -> bool {
        let v = field_value(d, self.field);
        let Some(first) = self.values.first() else {
            return matches!(self.op, Operator::NotIn);
        };
        match self.op {
            Operator::Eq => v == *first,
            Operator::NotEq => v != *first,
            Operator::In => self.values.contains(&v),
            Operator::NotIn => !self.values.contains(&v),
            Operator::GreaterThan => v > *first,
            Operator::GreaterThanOrEqual => v >= *first,
            Operator::LessThan => v < *first,
            Operator::LessThanOrEqual => v <= *first,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub field: Field,
    pub direction: Direction,
}

impl Order {
    pub fn asc(field: Field) -> Self {
        Self {
            field,
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: Field) -> Self {
        Self {
            field,
            direction: Direction::Desc,
        }
    }
}

/// Listing request. `limit` of zero means unbounded; an empty cursor
/// starts from the first row. Paging (a non-zero `limit` or a cursor)
/// needs `orders` ending with the id field. Unordered listings come back
/// sorted by id.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub filters: Vec<ListFilter>,
    pub orders: Vec<Order>,
    pub cursor: String,
    pub limit: usize,
}

impl ListOptions {
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        if self.orders.is_empty() {
            if self.limit > 0 || !self.cursor.is_empty() {
                return Err(StoreError::InvalidArgument(
                    "paging requires an ordering ending with the id field".to_string(),
                ));
            }
            return Ok(());
        }
        match self.orders.last() {
            Some(o) if o.field == Field::Id => {}
            _ => {
                return Err(StoreError::InvalidArgument(
                    "id field is required as the last ordering field".to_string(),
                ));
            }
        }
        if self.orders[..self.orders.len() - 1]
            .iter()
            .any(|o| o.field == Field::Id)
        {
            return Err(StoreError::InvalidArgument(
                "id field may only appear once, as the last ordering field".to_string(),
            ));
        }
        Ok(())
    }

    /// Compare two rows under this listing's ordering, by id when unordered.
    pub(crate) fn compare(&self, a: &Deployment, b: &Deployment) -> Ordering {
        if self.orders.is_empty() {
            return a.id.as_str().cmp(b.id.as_str());
        }
        let ka = sort_key(a, &self.orders);
        let kb = sort_key(b, &self.orders);
        compare_keys(&ka, &kb, &self.orders)
    }

    /// Whether `d` comes strictly after the row encoded in the cursor.
    pub(crate) fn is_after(&self, d: &Deployment, cursor: &[FieldValue]) -> bool {
        compare_keys(&sort_key(d, &self.orders), cursor, &self.orders) == Ordering::Greater
    }
}

pub(crate) fn field_value(d: &Deployment, field: Field) -> FieldValue {
    match field {
        Field::Id => d.id.as_str().into(),
        Field::ApplicationId => d.application_id.as_str().into(),
        Field::Kind => d.kind.into(),
        Field::Status => d.status.into(),
        Field::CreatedAt => d.created_at.timestamp_millis().into(),
        Field::UpdatedAt => d.updated_at.timestamp_millis().into(),
    }
}

fn sort_key(d: &Deployment, orders: &[Order]) -> Vec<FieldValue> {
    orders.iter().map(|o| field_value(d, o.field)).collect()
}

fn compare_keys(a: &[FieldValue], b: &[FieldValue], orders: &[Order]) -> Ordering {
    for ((va, vb), order) in a.iter().zip(b).zip(orders) {
        let ord = match order.direction {
            Direction::Asc => va.cmp(vb),
            Direction::Desc => vb.cmp(va),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Encode the last row of a page as the cursor for the next one. Returns an
/// empty string when there is no row to continue from or the listing is
/// unordered and so cannot be resumed.
pub fn next_cursor(rows: &[Deployment], opts: &ListOptions) -> Result<String, StoreError> {
    let Some(last) = rows.last() else {
        return Ok(String::new());
    };
    if opts.orders.is_empty() {
        return Ok(String::new());
    }
    opts.validate()?;
    let values = sort_key(last, &opts.orders);
    let json = serde_json::to_vec(&values).map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
    Ok(STANDARD.encode(json))
}

pub(crate) fn decode_cursor(cursor: &str, opts: &ListOptions) -> Result<Vec<FieldValue>, StoreError> {
    let bytes = STANDARD
        .decode(cursor)
        .map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
    let values: Vec<FieldValue> =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
    if values.len() != opts.orders.len() {
        return Err(StoreError::InvalidCursor(format!(
            "cursor carries {} values for {} ordering fields",
            values.len(),
            opts.orders.len()
        )));
    }
    Ok(values)
}
