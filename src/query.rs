use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::record::StoredRecord;
use crate::signature::{Signature, Words, WordsConfig};

/// 调用方提供的过滤条件
///
/// JSON 形式例如 `{"term": {"field": "metadata.album", "value": "louvre"}}`，
/// 字段只能是 `key` 或 `metadata.<路径>`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Exists { field: String },
    All(Vec<Filter>),
    Any(Vec<Filter>),
    Not(Box<Filter>),
}

/// 过滤条件引用的字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Key,
    /// metadata 中的路径，按层级拆分
    Metadata(Vec<String>),
}

impl Field {
    pub fn parse(field: &str) -> Result<Self> {
        if field == "key" {
            return Ok(Self::Key);
        }
        let Some(path) = field.strip_prefix("metadata.") else {
            return Err(Error::input(format!("不支持的过滤字段: {field}")));
        };
        let parts = path.split('.').map(str::to_owned).collect::<Vec<_>>();
        let valid = |s: &String| {
            !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        };
        if !parts.iter().all(valid) {
            return Err(Error::input(format!("无效的过滤字段: {field}")));
        }
        Ok(Self::Metadata(parts))
    }

    /// 从记录中取出字段的值，不存在时返回 None
    pub fn lookup<'a>(&self, record: &'a StoredRecord, key: &'a Value) -> Option<&'a Value> {
        match self {
            Self::Key => Some(key),
            Self::Metadata(path) => {
                let mut value = record.metadata.as_ref()?;
                for part in path {
                    value = value.get(part)?;
                }
                Some(value)
            }
        }
    }
}

impl Filter {
    /// 检查所有字段和值是否合法
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Term { field, value } => check_value(&Field::parse(field)?, value),
            Self::Terms { field, values } => {
                let field = Field::parse(field)?;
                values.iter().try_for_each(|value| check_value(&field, value))
            }
            Self::Exists { field } => Field::parse(field).map(|_| ()),
            Self::All(filters) | Self::Any(filters) => filters.iter().try_for_each(Filter::validate),
            Self::Not(filter) => filter.validate(),
        }
    }

    /// 在内存中对一条记录求值
    pub fn matches(&self, record: &StoredRecord) -> bool {
        let key = Value::String(record.key.clone());
        self.matches_with(record, &key)
    }

    fn matches_with(&self, record: &StoredRecord, key: &Value) -> bool {
        let lookup = |field: &str| {
            Field::parse(field).ok().and_then(|f| f.lookup(record, key).cloned())
        };
        match self {
            Self::Term { field, value } => {
                lookup(field).is_some_and(|v| scalar_eq(&v, value))
            }
            Self::Terms { field, values } => {
                lookup(field).is_some_and(|v| values.iter().any(|x| scalar_eq(&v, x)))
            }
            Self::Exists { field } => lookup(field).is_some_and(|v| !v.is_null()),
            Self::All(filters) => filters.iter().all(|f| f.matches_with(record, key)),
            Self::Any(filters) => filters.iter().any(|f| f.matches_with(record, key)),
            Self::Not(filter) => !filter.matches_with(record, key),
        }
    }
}

/// 过滤值只能是标量，`key` 字段只能与字符串比较
fn check_value(field: &Field, value: &Value) -> Result<()> {
    match (field, value) {
        (_, Value::Array(_) | Value::Object(_)) => Err(Error::input("过滤值只能是标量")),
        (Field::Key, value) if !value.is_string() => {
            Err(Error::input(format!("key 只能与字符串比较: {value}")))
        }
        _ => Ok(()),
    }
}

/// 类型严格的比较：数字按数值比较，布尔与数字、字符串与其他类型互不相等
fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        // null 永远不相等，与 SQL 语义保持一致
        (Value::Null, _) | (_, Value::Null) => false,
        _ => a == b,
    }
}

/// 粗筛查询
///
/// 每个分桶对应一个可选的 should 条件，命中越多分数越高。
/// `must` 与 should 条件取 AND，`filter` 只过滤不计分。
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub should: Vec<(String, i64)>,
    pub must: Option<Filter>,
    pub filter: Option<Filter>,
    /// 返回的文档是否剔除分桶字段，始终为 true
    pub exclude_words: bool,
}

impl CandidateQuery {
    /// 构造粗筛查询
    ///
    /// 只拷贝调用方的数据，不会修改传入的签名和过滤条件。
    pub fn build(
        signature: &Signature,
        config: &WordsConfig,
        must: Option<&Filter>,
        pre_filter: Option<&Filter>,
    ) -> Result<Self> {
        config.check(signature)?;
        if let Some(filter) = must {
            filter.validate()?;
        }
        if let Some(filter) = pre_filter {
            filter.validate()?;
        }
        Ok(Self {
            should: words_to_terms(&signature.words),
            must: must.cloned(),
            filter: pre_filter.cloned(),
            exclude_words: true,
        })
    }

    /// 至少需要命中多少个 should 条件
    ///
    /// 与常见文档存储的 bool 查询一致：只有 should 时至少命中一个，
    /// 存在 must 或 filter 时 should 只影响分数。
    pub fn minimum_should_match(&self) -> usize {
        if self.must.is_none() && self.filter.is_none() { 1 } else { 0 }
    }

    /// 计算一条记录的粗筛分数
    pub fn score(&self, words: &Words) -> usize {
        self.should.iter().filter(|(bucket, value)| words.get(bucket) == Some(value)).count()
    }

    /// 记录是否满足 must 与 filter
    pub fn accepts(&self, record: &StoredRecord) -> bool {
        self.must.as_ref().is_none_or(|f| f.matches(record))
            && self.filter.as_ref().is_none_or(|f| f.matches(record))
    }
}

fn words_to_terms(words: &Words) -> Vec<(String, i64)> {
    words.iter().map(|(k, v)| (k.clone(), *v)).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::record::RecordId;

    fn record(key: &str, metadata: Option<Value>) -> StoredRecord {
        StoredRecord {
            id: RecordId("1".to_string()),
            key: key.to_string(),
            signature: vec![],
            metadata,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_filter_json() {
        let filter: Filter = serde_json::from_value(json!({
            "all": [
                {"term": {"field": "metadata.album", "value": "louvre"}},
                {"not": {"exists": {"field": "metadata.hidden"}}}
            ]
        }))
        .unwrap();
        assert!(filter.validate().is_ok());
        assert!(filter.matches(&record("a", Some(json!({"album": "louvre"})))));
        assert!(!filter.matches(&record("a", Some(json!({"album": "louvre", "hidden": true})))));
        assert!(!filter.matches(&record("a", None)));
    }

    #[test]
    fn test_invalid_field() {
        let filter = Filter::Term { field: "signature".into(), value: json!(1) };
        assert!(matches!(filter.validate(), Err(Error::Input(_))));
        let filter = Filter::Exists { field: "metadata.a..b".into() };
        assert!(matches!(filter.validate(), Err(Error::Input(_))));
        let filter = Filter::Term { field: "key".into(), value: json!([1]) };
        assert!(matches!(filter.validate(), Err(Error::Input(_))));
    }

    #[test]
    fn test_key_and_numbers() {
        let r = record("mona_lisa", Some(json!({"year": 1503})));
        assert!(Filter::Term { field: "key".into(), value: json!("mona_lisa") }.matches(&r));
        assert!(Filter::Term { field: "metadata.year".into(), value: json!(1503.0) }.matches(&r));
        assert!(
            Filter::Terms { field: "metadata.year".into(), values: vec![json!(1), json!(1503)] }
                .matches(&r)
        );
        assert!(Filter::Not(Box::new(Filter::Term {
            field: "metadata.missing".into(),
            value: json!(1)
        }))
        .matches(&r));
    }

    #[test]
    fn test_type_strict_comparison() {
        let r = record("5", Some(json!({"flag": 1, "name": "1"})));
        let term = |field: &str, value: Value| Filter::Term { field: field.into(), value };
        assert!(!term("metadata.flag", json!(true)).matches(&r));
        assert!(term("metadata.flag", json!(1)).matches(&r));
        assert!(!term("metadata.name", json!(1)).matches(&r));
        assert!(term("metadata.name", json!("1")).matches(&r));
        assert!(!term("metadata.flag", Value::Null).matches(&r));

        let key_number = term("key", json!(5));
        assert!(matches!(key_number.validate(), Err(Error::Input(_))));
        let key_terms = Filter::Terms { field: "key".into(), values: vec![json!("5"), json!(true)] };
        assert!(matches!(key_terms.validate(), Err(Error::Input(_))));
    }

    #[test]
    fn test_build_does_not_touch_input() {
        let config = WordsConfig::new(2, 2);
        let signature = Signature::from_vector(vec![1., -1., 0.], &config);
        let before = signature.clone();
        let must = Filter::Exists { field: "metadata.a".into() };
        let query = CandidateQuery::build(&signature, &config, Some(&must), None).unwrap();
        assert_eq!(signature, before);
        assert_eq!(query.should.len(), 2);
        assert!(query.exclude_words);
        assert_eq!(query.minimum_should_match(), 0);
        assert_eq!(query.score(&signature.words), 2);
    }

    #[test]
    fn test_minimum_should_match() {
        let config = WordsConfig::default();
        let signature = Signature::from_vector(vec![0.1, 0.2, 0.3, 0.4], &config);
        let query = CandidateQuery::build(&signature, &config, None, None).unwrap();
        assert_eq!(query.minimum_should_match(), 1);

        let pre = Filter::Term { field: "key".into(), value: json!("x") };
        let query = CandidateQuery::build(&signature, &config, None, Some(&pre)).unwrap();
        assert_eq!(query.minimum_should_match(), 0);
    }

    #[test]
    fn test_missing_bucket_rejected() {
        let config = WordsConfig::default();
        let mut signature = Signature::from_vector(vec![0.1, 0.2, 0.3, 0.4], &config);
        signature.words.clear();
        let err = CandidateQuery::build(&signature, &config, None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature(_)));
    }
}
