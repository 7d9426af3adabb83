use crate::error::{Error, Result};
use crate::record::{Hit, SearchMatch};

/// 默认的距离阈值
pub const DEFAULT_DISTANCE_CUTOFF: f32 = 0.45;

/// 两个签名之间的归一化 L1 距离，取值范围 [0, 1]
///
/// `d(a, b) = |a - b|₁ / (|a|₁ + |b|₁)`，两个向量都为零向量时定义为 0。
/// 调用方需要保证两者长度一致。
pub fn normalized_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let (mut diff, mut norm) = (0f64, 0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        diff += (x - y).abs();
        norm += x.abs() + y.abs();
    }
    if norm == 0. { 0. } else { (diff / norm) as f32 }
}

/// 精排参数
#[derive(Debug, Clone, Copy)]
pub struct RankOptions {
    /// 距离严格小于该值的候选才会保留
    pub distance_cutoff: f32,
    /// 是否按距离升序重新排序，默认保留粗筛顺序
    pub sort_by_distance: bool,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self { distance_cutoff: DEFAULT_DISTANCE_CUTOFF, sort_by_distance: false }
    }
}

/// 对粗筛候选计算精确距离并按阈值过滤
///
/// 任何一个候选的维度与查询不一致都会报错，即使它本来会被阈值过滤掉。
pub fn rank(hits: Vec<Hit>, query: &[f32], options: RankOptions) -> Result<Vec<SearchMatch>> {
    if hits.is_empty() {
        return Ok(vec![]);
    }

    if let Some(hit) = hits.iter().find(|hit| hit.record.signature.len() != query.len()) {
        return Err(Error::DimensionMismatch {
            expected: query.len(),
            found: hit.record.signature.len(),
        });
    }

    let mut matches = hits
        .into_iter()
        .filter_map(|hit| {
            let distance = normalized_distance(&hit.record.signature, query);
            (distance < options.distance_cutoff).then(|| SearchMatch {
                id: hit.record.id,
                key: hit.record.key,
                score: hit.score,
                distance,
                metadata: hit.record.metadata,
            })
        })
        .collect::<Vec<_>>();

    if options.sort_by_distance {
        // 稳定排序，距离相同的保持粗筛顺序
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::record::{RecordId, StoredRecord};

    fn hit(id: &str, score: f32, signature: Vec<f32>) -> Hit {
        Hit {
            score,
            record: StoredRecord {
                id: RecordId(id.to_string()),
                key: format!("key-{id}"),
                signature,
                metadata: None,
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_distance_identical() {
        let a = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(normalized_distance(&a, &a), 0.);
    }

    #[test]
    fn test_distance_zero_vectors() {
        assert_eq!(normalized_distance(&[0., 0.], &[0., 0.]), 0.);
    }

    #[test]
    fn test_distance_opposite() {
        assert!((normalized_distance(&[1., -1.], &[-1., 1.]) - 1.).abs() < 1e-6);
        assert!((normalized_distance(&[1., 0.], &[0., 0.]) - 1.).abs() < 1e-6);
    }

    #[test]
    fn test_distance_half() {
        // |2-1| / (2 + 1)
        assert!((normalized_distance(&[2.], &[1.]) - 1. / 3.).abs() < 1e-6);
    }

    #[test]
    fn test_rank_empty() {
        assert!(rank(vec![], &[1., 2.], RankOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_rank_cutoff_is_strict() {
        // 距离正好为 1/3
        let hits = vec![hit("a", 1., vec![1.])];
        let options = RankOptions { distance_cutoff: 1. / 3., sort_by_distance: false };
        assert!(rank(hits.clone(), &[2.], options).unwrap().is_empty());
        let options = RankOptions { distance_cutoff: 0.34, sort_by_distance: false };
        assert_eq!(rank(hits, &[2.], options).unwrap().len(), 1);
    }

    #[test]
    fn test_rank_keeps_coarse_order() {
        let hits = vec![hit("far", 5., vec![1., 1.2]), hit("near", 3., vec![1., 1.])];
        let result = rank(hits.clone(), &[1., 1.], RankOptions::default()).unwrap();
        assert_eq!(result[0].id.as_str(), "far");
        assert_eq!(result[0].score, 5.);

        let options = RankOptions { sort_by_distance: true, ..Default::default() };
        let result = rank(hits, &[1., 1.], options).unwrap();
        assert_eq!(result[0].id.as_str(), "near");
        assert_eq!(result[0].distance, 0.);
        assert_eq!(result[0].key, "key-near");
    }

    #[test]
    fn test_rank_dimension_mismatch() {
        let hits = vec![hit("a", 1., vec![1., 2.]), hit("b", 1., vec![1.])];
        let err = rank(hits, &[1., 2.], RankOptions::default()).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, found: 1 }));
    }

    #[test]
    fn test_cutoff_monotonic() {
        let hits = (0..20)
            .map(|i| hit(&i.to_string(), 1., vec![1., i as f32 / 10.]))
            .collect::<Vec<_>>();
        let mut last = usize::MAX;
        for step in (0..=10).rev() {
            let options = RankOptions { distance_cutoff: step as f32 / 10., ..Default::default() };
            let n = rank(hits.clone(), &[1., 0.], options).unwrap().len();
            assert!(n <= last);
            last = n;
        }
        assert_eq!(last, 0);
    }
}
