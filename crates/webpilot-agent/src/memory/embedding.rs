//! Deterministic text embeddings for store retrieval.
//!
//! Hashed bag-of-words into a fixed-dimension term-frequency vector,
//! L2-normalized, compared by cosine. No external model: stores hold at
//! most a few thousand entries and retrieval is in-process.

use std::hash::{Hash, Hasher};

pub const EMBED_DIM: usize = 256;

fn bucket(token: &str) -> usize {
    let mut hasher = std::hash::DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % EMBED_DIM
}

/// Embed a text into a normalized term-frequency vector.
pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBED_DIM];
    for token in tokenize(text) {
        vector[bucket(&token)] += 1.0;
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
}

/// Cosine similarity of two embeddings; 0.0 when either is empty.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Similarity of two raw texts.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    cosine(&embed(a), &embed(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_have_unit_similarity() {
        let sim = text_similarity("extract all product links", "extract all product links");
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_texts_score_higher_than_unrelated() {
        let related = text_similarity(
            "extract links from the shop page",
            "extract all the links on a shopping site",
        );
        let unrelated = text_similarity(
            "extract links from the shop page",
            "restart the kubernetes cluster",
        );
        assert!(related > unrelated);
    }

    #[test]
    fn embedding_is_normalized() {
        let v = embed("some goal text with several words");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let v = embed("");
        assert!(v.iter().all(|&x| x == 0.0));
        assert_eq!(cosine(&v, &embed("anything")), 0.0);
    }

    #[test]
    fn embedding_is_deterministic() {
        assert_eq!(embed("fill the login form"), embed("fill the login form"));
    }
}
