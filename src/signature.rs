use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 分桶名 => 离散化后的分桶值
pub type Words = BTreeMap<String, i64>;

/// 离散化时视为 0 的阈值
const ZERO_EPS: f32 = 1e-6;

/// 图片签名：定长向量 + 由向量推导出的分桶
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub vector: Vec<f32>,
    pub words: Words,
}

impl Signature {
    /// 使用给定的分桶配置从向量构造签名
    pub fn from_vector(vector: Vec<f32>, config: &WordsConfig) -> Self {
        let words = config.derive(&vector);
        Self { vector, words }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }
}

/// 分桶推导参数
///
/// 从签名中等间距截取 `n` 个长度为 `k` 的片段，每个分量按符号离散化为
/// `{0, 1, 2}`，再把片段按三进制读成一个整数。签名长度不足时 `k` 和 `n`
/// 会被相应缩小，所以分桶集合只取决于签名长度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordsConfig {
    pub n: usize,
    pub k: usize,
}

impl Default for WordsConfig {
    fn default() -> Self {
        Self { n: 63, k: 16 }
    }
}

impl WordsConfig {
    pub fn new(n: usize, k: usize) -> Self {
        Self { n: n.max(1), k: k.max(1) }
    }

    /// 返回 (实际分桶数, 实际片段长度)
    fn effective(&self, len: usize) -> (usize, usize) {
        if len == 0 {
            return (0, 0);
        }
        let k = self.k.min(len);
        let n = self.n.min(len - k + 1);
        (n, k)
    }

    fn offset(i: usize, n: usize, span: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        ((i * span) as f64 / (n - 1) as f64).round() as usize
    }

    pub fn bucket_name(i: usize) -> String {
        format!("simple_word_{i}")
    }

    /// 长度为 `len` 的签名应当拥有的分桶名
    pub fn bucket_names(&self, len: usize) -> Vec<String> {
        let (n, _) = self.effective(len);
        (0..n).map(Self::bucket_name).collect()
    }

    /// 从签名向量推导分桶
    pub fn derive(&self, vector: &[f32]) -> Words {
        let (n, k) = self.effective(vector.len());
        let span = vector.len() - k;
        (0..n)
            .map(|i| {
                let start = Self::offset(i, n, span);
                let word = vector[start..start + k].iter().fold(0i64, |acc, &x| {
                    let digit = if x > ZERO_EPS {
                        2
                    } else if x < -ZERO_EPS {
                        0
                    } else {
                        1
                    };
                    // k 很大时允许回绕，只要求确定性
                    acc.wrapping_mul(3).wrapping_add(digit)
                });
                (Self::bucket_name(i), word)
            })
            .collect()
    }

    /// 检查分桶是否完整，返回缺失的第一个分桶
    pub fn check(&self, signature: &Signature) -> Result<()> {
        if signature.is_empty() {
            return Err(Error::InvalidSignature("签名向量为空".to_string()));
        }
        for name in self.bucket_names(signature.len()) {
            if !signature.words.contains_key(&name) {
                return Err(Error::InvalidSignature(format!("缺少分桶字段 {name}")));
            }
        }
        Ok(())
    }
}

/// 签名生成器，把图片数据转换为签名
///
/// 计算可能比较耗时，调用方会放到阻塞线程池中执行。
pub trait SignatureGenerator: Send + Sync {
    fn signature(&self, data: &[u8]) -> Result<Signature>;
}

/// 读取由上游特征提取程序预先计算好的签名，格式为 JSON 数组
#[derive(Debug, Clone, Default)]
pub struct JsonSignature {
    pub words: WordsConfig,
}

impl JsonSignature {
    pub fn new(words: WordsConfig) -> Self {
        Self { words }
    }
}

impl SignatureGenerator for JsonSignature {
    fn signature(&self, data: &[u8]) -> Result<Signature> {
        let vector: Vec<f32> = serde_json::from_slice(data)
            .map_err(|e| Error::input(format!("无法解析签名: {e}")))?;
        if vector.is_empty() {
            return Err(Error::input("签名向量为空"));
        }
        Ok(Signature::from_vector(vector, &self.words))
    }
}

/// 基于灰度缩略图的简单签名，仅用于演示
#[cfg(feature = "opencv")]
pub struct GrayGridSignature {
    pub grid: i32,
    pub words: WordsConfig,
}

#[cfg(feature = "opencv")]
impl GrayGridSignature {
    pub fn new(grid: i32, words: WordsConfig) -> Self {
        Self { grid, words }
    }
}

#[cfg(feature = "opencv")]
impl SignatureGenerator for GrayGridSignature {
    fn signature(&self, data: &[u8]) -> Result<Signature> {
        use opencv::core::{Mat, Size};
        use opencv::prelude::*;
        use opencv::{imgcodecs, imgproc};

        let to_input = |e: opencv::Error| Error::input(format!("无法解码图片: {e}"));

        let buf = Mat::from_slice(data).map_err(to_input)?;
        let img = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_GRAYSCALE).map_err(to_input)?;
        if img.empty() {
            return Err(Error::input("无法解码图片"));
        }

        let mut small = Mat::default();
        imgproc::resize(
            &img,
            &mut small,
            Size::new(self.grid, self.grid),
            0.0,
            0.0,
            imgproc::INTER_AREA,
        )
        .map_err(to_input)?;

        let pixels = small.data_bytes().map_err(to_input)?;
        let mean = pixels.iter().map(|&p| p as f32).sum::<f32>() / pixels.len() as f32;
        let vector = pixels.iter().map(|&p| (p as f32 - mean) / 255.).collect();

        Ok(Signature::from_vector(vector, &self.words))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_signature_single_word() {
        let config = WordsConfig::default();
        let words = config.derive(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(words.len(), 1);
        // 全部为正 => 2222 (三进制)
        assert_eq!(words["simple_word_0"], 2 * 27 + 2 * 9 + 2 * 3 + 2);
    }

    #[test]
    fn test_discretize_sign() {
        let config = WordsConfig::new(1, 3);
        let words = config.derive(&[-0.5, 0.0, 0.5]);
        // 012 (三进制)
        assert_eq!(words["simple_word_0"], 5);
    }

    #[test]
    fn test_bucket_set_depends_only_on_length() {
        let config = WordsConfig::new(4, 2);
        let a = config.derive(&[1., 2., 3., 4., 5., 6.]);
        let b = config.derive(&[-1., 0., 0., 0., 0., -6.]);
        assert_eq!(a.keys().collect::<Vec<_>>(), b.keys().collect::<Vec<_>>());
        assert_eq!(config.bucket_names(6).len(), 4);
    }

    #[test]
    fn test_offsets_cover_both_ends() {
        let config = WordsConfig::new(3, 1);
        let words = config.derive(&[-1., 0., 0., 0., 1.]);
        assert_eq!(words["simple_word_0"], 0);
        assert_eq!(words["simple_word_1"], 1);
        assert_eq!(words["simple_word_2"], 2);
    }

    #[test]
    fn test_check_missing_bucket() {
        let config = WordsConfig::new(2, 2);
        let mut signature = Signature::from_vector(vec![1., 2., 3.], &config);
        assert!(config.check(&signature).is_ok());
        signature.words.remove("simple_word_1");
        assert!(matches!(config.check(&signature), Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn test_json_signature() {
        let generator = JsonSignature::default();
        let signature = generator.signature(b"[0.1, 0.2, 0.3, 0.4]").unwrap();
        assert_eq!(signature.vector, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(signature.words.len(), 1);

        assert!(matches!(generator.signature(b"[]"), Err(Error::Input(_))));
        assert!(matches!(generator.signature(b"not json"), Err(Error::Input(_))));
    }
}
