use std::sync::Arc;

use indicatif::ProgressStyle;

use crate::signature::{SignatureGenerator, WordsConfig};

/// 进度条样式
pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// 默认的签名生成器
///
/// 启用 `opencv` 特性时直接读取图片，否则读取预先计算的 JSON 签名。
pub fn default_generator(words: WordsConfig) -> Arc<dyn SignatureGenerator> {
    #[cfg(feature = "opencv")]
    {
        Arc::new(crate::signature::GrayGridSignature::new(16, words))
    }
    #[cfg(not(feature = "opencv"))]
    {
        Arc::new(crate::signature::JsonSignature::new(words))
    }
}

/// 默认扫描的文件后缀
pub const DEFAULT_SUFFIX: &str = if cfg!(feature = "opencv") { "jpg,jpeg,png,webp" } else { "json" };
