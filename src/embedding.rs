use crate::{
    document::Chunk,
    error::{Error, Result},
};

pub const DEFAULT_EMBEDDING_DIM: usize = 256;

/// Turns text into fixed-length vectors.
pub trait Embedder: Send + Sync {
    /// Stable identity recorded alongside stored embeddings.
    fn id(&self) -> String;

    fn dim(&self) -> usize;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| Error::CapabilityUnavailable {
                capability: "embedder",
                reason: "embedder returned no vector".to_string(),
            })
    }
}

/// Deterministic bag-of-features embedder.
///
/// Lowercased words and character trigrams are hashed (FNV-1a) into `dim`
/// signed buckets and the result is L2-normalized. Texts sharing vocabulary
/// land close together under cosine distance.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let h = fnv1a(feature.as_bytes());
        let bucket = (h % self.dim as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            self.add_feature(&mut vector, &word, 1.0);

            let padded: Vec<char> =
                format!("<{word}>").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut vector, &gram, 0.5);
            }
        }

        normalize(&mut vector);
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn id(&self) -> String {
        format!("hashing-fnv1a-{}", self.dim)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(PRIME))
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Cosine distance `1 - cos(a, b)`. Zero vectors are at distance 1.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na.sqrt() * nb.sqrt())
}

/// Caller-facing score for a distance: `round(1 - distance, 2)`.
///
/// # Examples
///
/// ```
/// use chunkscope::embedding::score_from_distance;
///
/// assert_eq!(score_from_distance(0.30), 0.70);
/// ```
pub fn score_from_distance(distance: f32) -> f32 {
    // Rounded in f64: f32 products land on .xx5 ties that round the wrong way.
    (((1.0 - f64::from(distance)) * 100.0).round() / 100.0) as f32
}

/// Embed every chunk that has no embedding yet.
///
/// Returns the number of chunks embedded.
pub fn embed_chunks(embedder: &dyn Embedder, chunks: &mut [Chunk]) -> Result<usize> {
    let pending: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.embedding.is_none())
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> =
        pending.iter().map(|&i| chunks[i].text.clone()).collect();
    let vectors = embedder.embed_batch(&texts)?;
    if vectors.len() != pending.len() {
        return Err(Error::CapabilityUnavailable {
            capability: "embedder",
            reason: format!(
                "expected {} vectors, got {}",
                pending.len(),
                vectors.len()
            ),
        });
    }

    for (i, vector) in pending.into_iter().zip(vectors) {
        chunks[i].embedding = Some(vector);
    }
    Ok(texts.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_rounded_similarity() {
        assert_eq!(score_from_distance(0.30), 0.70);
        assert_eq!(score_from_distance(0.0), 1.0);
        assert_eq!(score_from_distance(0.123), 0.88);
        assert_eq!(score_from_distance(1.5), -0.5);
    }

    #[test]
    fn score_rounding_near_half_hundredths() {
        // In f32, (1 - 0.025) * 100 becomes exactly 97.5 and rounds up.
        assert_eq!(score_from_distance(0.025), 0.97);
        assert_eq!(score_from_distance(0.045), 0.95);
        assert_eq!(score_from_distance(0.165), 0.83);
    }

    #[test]
    fn cosine_distance_basics() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn hashing_embedder_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed("Quarterly revenue grew").unwrap();
        let b = e.embed("Quarterly revenue grew").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_is_closer() {
        let e = HashingEmbedder::default();
        let q = e.embed("revenue growth").unwrap();
        let near = e.embed("revenue growth was strong").unwrap();
        let far = e.embed("the cat sat on a mat").unwrap();
        assert!(cosine_distance(&q, &near) < cosine_distance(&q, &far));
    }

    #[test]
    fn embed_chunks_skips_embedded() {
        let e = HashingEmbedder::new(8);
        let mut doc = crate::document::Document::from_sentences(
            None,
            vec!["a b".to_string(), "c d".to_string()],
            vec![],
        );
        doc.chunks[0].embedding = Some(vec![1.0; 8]);

        let n = embed_chunks(&e, &mut doc.chunks).unwrap();
        assert_eq!(n, 1);
        assert_eq!(doc.chunks[0].embedding, Some(vec![1.0; 8]));
        assert!(doc.chunks[1].embedding.is_some());
        assert_eq!(e.id(), "hashing-fnv1a-8");
    }
}
