use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::signature::Words;

/// 由存储分配的记录 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// 待写入的记录
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub key: String,
    pub signature: Vec<f32>,
    /// 只用于粗筛，不会出现在查询结果中
    pub words: Words,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// 从存储读出的记录，不包含分桶字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredRecord {
    pub id: RecordId,
    pub key: String,
    pub signature: Vec<f32>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// 粗筛阶段返回的候选
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// 粗筛相关性分数，越高越相关
    pub score: f32,
    pub record: StoredRecord,
}

/// 精排后的搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchMatch {
    pub id: RecordId,
    pub key: String,
    pub score: f32,
    pub distance: f32,
    pub metadata: Option<Value>,
}
