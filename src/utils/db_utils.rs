use chrono::NaiveDate;
use serde_json::Value;
use sqlx::{FromRow, PgPool, postgres::PgRow};

use crate::error::{AppError, AppResult};

/// Binds a [`SqlValue`] to any sqlx query builder.
macro_rules! bind_value {
    ($query:expr, $value:expr) => {
        match $value {
            SqlValue::String(v) => $query.bind(v),
            SqlValue::I64(v) => $query.bind(v),
            SqlValue::F64(v) => $query.bind(v),
            SqlValue::Bool(v) => $query.bind(v),
            SqlValue::Date(v) => $query.bind(v),
            SqlValue::Null => $query.bind(None::<String>),
        }
    };
}

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    I64(i64),
    F64(f64),
    Bool(bool),
    Date(NaiveDate),
    Null,
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// ===============================
/// Build dynamic UPDATE SQL
/// ===============================
///
/// Only keys listed in `allowed_columns` may appear in the payload; they are
/// the only identifiers interpolated into the statement. `updated_at` is
/// bumped on every update.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed_columns: &[&str],
    id_column: &str,
    id_value: i64,
) -> AppResult<SqlUpdate> {
    let obj = payload
        .as_object()
        .ok_or_else(|| AppError::bad_request("Payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(AppError::bad_request("No fields provided for update"));
    }

    if let Some(unknown) = obj.keys().find(|k| !allowed_columns.contains(&k.as_str())) {
        return Err(AppError::bad_request(format!("Field '{}' cannot be updated", unknown)));
    }

    let mut values = Vec::with_capacity(obj.len() + 1);
    let mut assignments = Vec::with_capacity(obj.len() + 1);

    // Convert JSON values → SqlValue
    for (i, (column, value)) in obj.iter().enumerate() {
        assignments.push(format!("{} = ${}", column, i + 1));
        let value = match value {
            Value::String(s) => SqlValue::String(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::I64(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::F64(f)
                } else {
                    return Err(AppError::bad_request("Unsupported number"));
                }
            }
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Null => SqlValue::Null,
            _ => return Err(AppError::bad_request("Unsupported JSON value type")),
        };
        values.push(value);
    }
    assignments.push("updated_at = NOW()".to_string());

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        table,
        assignments.join(", "),
        id_column,
        values.len() + 1
    );

    // WHERE id = $n
    values.push(SqlValue::I64(id_value));

    Ok(SqlUpdate { sql, values })
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update(pool: &PgPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = bind_value!(query, value);
    }

    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

/// ===============================
/// Dynamic WHERE filters
/// ===============================
///
/// Clauses are built with numbered placeholders so the same filters can be
/// bound to both the COUNT and the page query.
#[derive(Debug, Default)]
pub struct Filters {
    clauses: Vec<String>,
    values: Vec<SqlValue>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `{column} {op} $n`.
    pub fn push(&mut self, column: &str, op: &str, value: SqlValue) -> &mut Self {
        let n = self.values.len() + 1;
        self.push_with(|_| format!("{column} {op} ${n}"), value)
    }

    /// Adds a clause built from the placeholder index, for expressions that
    /// use the same value more than once.
    pub fn push_with(&mut self, clause: impl FnOnce(usize) -> String, value: SqlValue) -> &mut Self {
        let n = self.values.len() + 1;
        self.clauses.push(clause(n));
        self.values.push(value);
        self
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}


/// Page of rows plus the total matching count.
///
/// `select` is everything before the WHERE clause, e.g.
/// `SELECT id, ... FROM vacations`.
pub async fn fetch_page<T>(
    pool: &PgPool,
    select: &str,
    count_from: &str,
    filters: Filters,
    order_by: &str,
    limit: u32,
    offset: i64,
) -> Result<(Vec<T>, i64), sqlx::Error>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    let where_sql = filters.where_sql();

    let count_sql = format!("SELECT COUNT(*) FROM {count_from}{where_sql}");
    let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
    for value in &filters.values {
        count_q = bind_value!(count_q, value.clone());
    }
    let total = count_q.fetch_one(pool).await?;

    let n = filters.len();
    let data_sql = format!(
        "{select}{where_sql} ORDER BY {order_by} LIMIT ${} OFFSET ${}",
        n + 1,
        n + 2
    );
    let mut data_q = sqlx::query_as::<_, T>(&data_sql);
    for value in filters.values {
        data_q = bind_value!(data_q, value);
    }
    let rows = data_q
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    Ok((rows, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COLUMNS: &[&str] = &["full_name", "email", "role"];

    #[test]
    fn builds_numbered_placeholders() {
        let update = build_update_sql(
            "users",
            &json!({"full_name": "Ana Pérez", "role": "admin"}),
            COLUMNS,
            "id",
            7,
        )
        .unwrap();

        assert_eq!(
            update.sql,
            "UPDATE users SET full_name = $1, role = $2, updated_at = NOW() WHERE id = $3"
        );
        assert_eq!(update.values.last(), Some(&SqlValue::I64(7)));
        assert_eq!(update.values.len(), 3);
    }

    #[test]
    fn rejects_columns_outside_the_allow_list() {
        let err = build_update_sql(
            "users",
            &json!({"password_hash": "x"}),
            COLUMNS,
            "id",
            1,
        );
        assert!(err.is_err());
    }

    #[test]
    fn rejects_empty_and_non_object_payloads() {
        assert!(build_update_sql("users", &json!({}), COLUMNS, "id", 1).is_err());
        assert!(build_update_sql("users", &json!([1, 2]), COLUMNS, "id", 1).is_err());
        assert!(build_update_sql("users", &json!({"email": ["a"]}), COLUMNS, "id", 1).is_err());
    }

    #[test]
    fn filters_number_their_placeholders() {
        let mut filters = Filters::new();
        assert_eq!(filters.where_sql(), "");

        filters
            .push("user_id", "=", SqlValue::I64(7))
            .push_with(
                |n| format!("(full_name ILIKE ${n} OR email ILIKE ${n})"),
                SqlValue::String("%ana%".into()),
            );
        assert_eq!(
            filters.where_sql(),
            " WHERE user_id = $1 AND (full_name ILIKE $2 OR email ILIKE $2)"
        );
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn date_like_strings_stay_text() {
        let update = build_update_sql(
            "users",
            &json!({"full_name": "2026-04-06"}),
            COLUMNS,
            "id",
            2,
        )
        .unwrap();
        assert_eq!(update.values[0], SqlValue::String("2026-04-06".into()));
    }
}
