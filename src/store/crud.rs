use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqliteConnection};

use crate::error::{Error, Result};
use crate::query::{CandidateQuery, Field, Filter};
use crate::record::{Hit, NewRecord, RecordId, StoredRecord};

const DIMENSION: &str = "dimension";

const SELECT_RECORD: &str = "SELECT r.id, r.key, r.signature, r.metadata, r.created_at";

/// record 表中的一行
#[derive(FromRow)]
pub struct RecordRow {
    pub id: String,
    pub key: String,
    pub signature: Vec<u8>,
    pub metadata: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub struct HitRow {
    #[sqlx(flatten)]
    pub record: RecordRow,
    pub score: i64,
}

impl TryFrom<RecordRow> for StoredRecord {
    type Error = Error;

    fn try_from(row: RecordRow) -> Result<Self> {
        if row.signature.len() % size_of::<f32>() != 0 {
            return Err(Error::StoreUnavailable(format!("记录 {} 的签名已损坏", row.id)));
        }
        Ok(Self {
            id: RecordId(row.id),
            key: row.key,
            signature: bytemuck::pod_collect_to_vec(&row.signature),
            metadata: row.metadata.map(|m| m.0),
            created_at: row.created_at,
        })
    }
}

/// 记录索引维度，已记录时保持不变，返回最终的维度
pub async fn ensure_dimension(conn: &mut SqliteConnection, dimension: usize) -> Result<usize> {
    let dimension = dimension as i64;
    sqlx::query("INSERT OR IGNORE INTO index_meta (name, value) VALUES (?, ?)")
        .bind(DIMENSION)
        .bind(dimension)
        .execute(&mut *conn)
        .await?;
    let (value,): (i64,) = sqlx::query_as("SELECT value FROM index_meta WHERE name = ?")
        .bind(DIMENSION)
        .fetch_one(&mut *conn)
        .await?;
    Ok(value as usize)
}

pub async fn get_dimension<'c, E>(executor: E) -> Result<Option<usize>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM index_meta WHERE name = ?")
        .bind(DIMENSION)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(|(value,)| value as usize))
}

/// 添加记录及其分桶
pub async fn add_record(conn: &mut SqliteConnection, id: &RecordId, record: &NewRecord) -> Result<()> {
    let signature: &[u8] = bytemuck::cast_slice(&record.signature);
    sqlx::query(
        r#"
        INSERT INTO record (id, key, signature, metadata, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.as_str())
    .bind(&record.key)
    .bind(signature)
    .bind(record.metadata.as_ref().map(Json))
    .bind(record.created_at)
    .execute(&mut *conn)
    .await?;

    for (bucket, value) in &record.words {
        sqlx::query("INSERT INTO record_word (record_id, bucket, value) VALUES (?, ?, ?)")
            .bind(id.as_str())
            .bind(bucket)
            .bind(value)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// 删除记录及其分桶，返回记录是否存在
pub async fn delete_record(conn: &mut SqliteConnection, id: &RecordId) -> Result<bool> {
    sqlx::query("DELETE FROM record_word WHERE record_id = ?")
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query("DELETE FROM record WHERE id = ?")
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// 按 key 精确查找记录
pub async fn get_records_by_key<'c, E>(executor: E, key: &str) -> Result<Vec<StoredRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows: Vec<RecordRow> =
        sqlx::query_as(&format!("{SELECT_RECORD} FROM record r WHERE r.key = ? ORDER BY r.seq ASC"))
            .bind(key)
            .fetch_all(executor)
            .await?;
    rows.into_iter().map(StoredRecord::try_from).collect()
}

pub async fn count_records<'c, E>(executor: E) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM record").fetch_one(executor).await?;
    Ok(count as u64)
}

/// 执行粗筛查询
pub async fn search<'c, E>(executor: E, query: &CandidateQuery, size: usize) -> Result<Vec<Hit>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let mut qb = build_search(query, size)?;
    let rows: Vec<HitRow> = qb.build_query_as().fetch_all(executor).await?;
    rows.into_iter()
        .map(|row| {
            Ok(Hit { score: row.score as f32, record: StoredRecord::try_from(row.record)? })
        })
        .collect()
}

/// 将粗筛查询编译为 SQL
///
/// 分数为命中的 (bucket, value) 数量；只有 should 条件时使用内连接，
/// 丢弃一个分桶都没有命中的记录。
pub fn build_search(query: &CandidateQuery, size: usize) -> Result<QueryBuilder<'static, Sqlite>> {
    let mut qb = QueryBuilder::new(SELECT_RECORD);
    qb.push(", COALESCE(w.hits, 0) AS score FROM record r ");
    qb.push(if query.minimum_should_match() > 0 { "JOIN" } else { "LEFT JOIN" });
    qb.push(" (SELECT record_id, COUNT(*) AS hits FROM record_word WHERE ");
    if query.should.is_empty() {
        qb.push("0");
    }
    for (i, (bucket, value)) in query.should.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push("(bucket = ").push_bind(bucket.clone());
        qb.push(" AND value = ").push_bind(*value).push(")");
    }
    qb.push(" GROUP BY record_id) w ON w.record_id = r.id WHERE 1");

    for filter in [&query.must, &query.filter].into_iter().flatten() {
        qb.push(" AND ");
        push_filter(&mut qb, filter)?;
    }

    qb.push(" ORDER BY score DESC, r.seq ASC LIMIT ").push_bind(size as i64);
    Ok(qb)
}

fn push_filter(qb: &mut QueryBuilder<'static, Sqlite>, filter: &Filter) -> Result<()> {
    match filter {
        Filter::Term { field, value } => {
            push_eq(qb, &Field::parse(field)?, value)?;
        }
        Filter::Terms { field, values } => {
            if values.is_empty() {
                qb.push("0");
                return Ok(());
            }
            let field = Field::parse(field)?;
            qb.push("(");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                push_eq(qb, &field, value)?;
            }
            qb.push(")");
        }
        Filter::Exists { field } => match Field::parse(field)? {
            Field::Key => {
                qb.push("1");
            }
            Field::Metadata(path) => {
                qb.push("(json_extract(r.metadata, ").push_bind(json_path(&path));
                qb.push(") IS NOT NULL)");
            }
        },
        Filter::All(filters) | Filter::Any(filters) => {
            let (empty, sep) = match filter {
                Filter::All(_) => ("1", " AND "),
                _ => ("0", " OR "),
            };
            if filters.is_empty() {
                qb.push(empty);
                return Ok(());
            }
            qb.push("(");
            for (i, filter) in filters.iter().enumerate() {
                if i > 0 {
                    qb.push(sep);
                }
                push_filter(qb, filter)?;
            }
            qb.push(")");
        }
        Filter::Not(filter) => {
            qb.push("NOT (");
            push_filter(qb, filter)?;
            qb.push(")");
        }
    }
    Ok(())
}

fn json_path(path: &[String]) -> String {
    let path = path.iter().map(|p| format!("\"{p}\"")).collect::<Vec<_>>().join(".");
    format!("$.{path}")
}

/// 类型严格的相等比较，结果始终为 0 或 1
///
/// 先用 `json_type` 确认 JSON 类型，避免 `true` 与 `1`、`"1"` 与 `1` 相等。
fn push_eq(qb: &mut QueryBuilder<'static, Sqlite>, field: &Field, value: &Value) -> Result<()> {
    let path = match field {
        Field::Key => {
            let Value::String(s) = value else {
                return Err(Error::input(format!("key 只能与字符串比较: {value}")));
            };
            qb.push("(r.key = ").push_bind(s.clone()).push(")");
            return Ok(());
        }
        Field::Metadata(path) => json_path(path),
    };

    let push_type = |qb: &mut QueryBuilder<'static, Sqlite>| {
        qb.push("json_type(r.metadata, ").push_bind(path.clone()).push(")");
    };
    let push_extract = |qb: &mut QueryBuilder<'static, Sqlite>| {
        qb.push("json_extract(r.metadata, ").push_bind(path.clone()).push(")");
    };

    qb.push("COALESCE(");
    match value {
        Value::Null => {
            qb.push("0");
        }
        Value::Bool(b) => {
            push_type(qb);
            qb.push(if *b { " = 'true'" } else { " = 'false'" });
        }
        Value::Number(n) => {
            push_type(qb);
            qb.push(" IN ('integer', 'real') AND ");
            push_extract(qb);
            qb.push(" = ");
            match n.as_i64() {
                Some(i) => qb.push_bind(i),
                None => qb.push_bind(n.as_f64().unwrap_or(f64::NAN)),
            };
        }
        Value::String(s) => {
            push_type(qb);
            qb.push(" = 'text' AND ");
            push_extract(qb);
            qb.push(" = ").push_bind(s.clone());
        }
        Value::Array(_) | Value::Object(_) => return Err(Error::input("过滤值只能是标量")),
    }
    qb.push(", 0)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::signature::{Signature, WordsConfig};

    fn query(must: Option<Filter>) -> CandidateQuery {
        let config = WordsConfig::new(2, 2);
        let signature = Signature::from_vector(vec![1., 0., -1.], &config);
        CandidateQuery::build(&signature, &config, must.as_ref(), None).unwrap()
    }

    /// 绕过 `CandidateQuery::build` 中的检查
    fn query_unchecked(must: Filter) -> CandidateQuery {
        CandidateQuery { must: Some(must), ..query(None) }
    }

    #[test]
    fn test_should_only_uses_inner_join() {
        let sql = build_search(&query(None), 10).unwrap().into_sql();
        assert!(sql.contains(" JOIN (SELECT record_id"));
        assert!(!sql.contains("LEFT JOIN"));
        assert!(sql.ends_with("LIMIT ?"));
    }

    #[test]
    fn test_filter_sql() {
        let must = Filter::All(vec![
            Filter::Term { field: "metadata.album".into(), value: json!("louvre") },
            Filter::Not(Box::new(Filter::Terms { field: "key".into(), values: vec![] })),
            Filter::Any(vec![]),
        ]);
        let sql = build_search(&query(Some(must)), 10).unwrap().into_sql();
        assert!(sql.contains("LEFT JOIN"));
        assert!(sql.contains(
            "AND (COALESCE(json_type(r.metadata, ?) = 'text' AND json_extract(r.metadata, ?) = ?, 0) \
             AND NOT (0) AND 0)"
        ));
    }

    #[test]
    fn test_typed_filter_sql() {
        let must = Filter::Terms {
            field: "metadata.flag".into(),
            values: vec![json!(true), json!(1), json!(null)],
        };
        let sql = build_search(&query(Some(must)), 10).unwrap().into_sql();
        assert!(sql.contains(
            "(COALESCE(json_type(r.metadata, ?) = 'true', 0) \
             OR COALESCE(json_type(r.metadata, ?) IN ('integer', 'real') AND json_extract(r.metadata, ?) = ?, 0) \
             OR COALESCE(0, 0))"
        ));

        let key = Filter::Term { field: "key".into(), value: json!(5) };
        assert!(matches!(build_search(&query_unchecked(key), 10), Err(Error::Input(_))));
    }
}
