use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("im_search_count", "count of the search requests", &["source"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "im_search_duration",
        "duration of the per-image search in seconds",
        &["source"]
    )
    .unwrap()
});

static METRIC_SEARCH_CANDIDATES: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "im_search_candidates",
        "number of the coarse candidates per search",
        vec![0., 1., 5., 10., 25., 50., 100., 250., 500., 1000.]
    )
    .unwrap()
});

static METRIC_SEARCH_MATCHES: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "im_search_matches",
        "number of the matches left after the distance cutoff",
        vec![0., 1., 2., 5., 10., 25., 50., 100.]
    )
    .unwrap()
});

static METRIC_INSERT_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("im_insert_count", "count of the inserted records").unwrap()
});

static METRIC_DEDUP_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("im_dedup_deleted", "count of the records removed by deduplication")
        .unwrap()
});

/// 记录一次搜索
pub fn inc_search(source: &str, duration: f32, candidates: usize, matches: usize) {
    METRIC_SEARCH_COUNT.with_label_values(&[source]).inc();
    METRIC_SEARCH_DURATION.with_label_values(&[source]).observe(duration as f64);
    METRIC_SEARCH_CANDIDATES.observe(candidates as f64);
    METRIC_SEARCH_MATCHES.observe(matches as f64);
}

pub fn inc_insert() {
    METRIC_INSERT_COUNT.inc();
}

pub fn inc_dedup_deleted(n: usize) {
    METRIC_DEDUP_DELETED.inc_by(n as u64);
}

/// 以文本格式导出所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&gather()).unwrap_or_default()
}
