use crate::domain::intent::Intent;

/// Embedded anchor phrases grouped per intent, in catalog declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnchorIndex {
    groups: Vec<AnchorGroup>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnchorGroup {
    pub intent: Intent,
    pub vectors: Vec<Vec<f32>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntentScore {
    pub intent: Intent,
    pub score: f32,
}

impl AnchorIndex {
    pub fn new(groups: Vec<AnchorGroup>) -> Self {
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|group| group.vectors.is_empty())
    }

    pub fn intent_count(&self) -> usize {
        self.groups.len()
    }

    pub fn vector_count(&self) -> usize {
        self.groups.iter().map(|group| group.vectors.len()).sum()
    }

    /// Per-intent maximum cosine similarity, declaration order preserved.
    pub fn scores(&self, query: &[f32]) -> Vec<IntentScore> {
        self.groups
            .iter()
            .filter(|group| !group.vectors.is_empty())
            .map(|group| IntentScore {
                intent: group.intent.clone(),
                score: group
                    .vectors
                    .iter()
                    .map(|anchor| cosine_similarity(query, anchor))
                    .fold(f32::NEG_INFINITY, f32::max),
            })
            .collect()
    }

    /// Highest scoring intent; on equal scores the earlier declaration wins.
    pub fn best_match(&self, query: &[f32]) -> Option<IntentScore> {
        let mut best: Option<IntentScore> = None;
        for candidate in self.scores(query) {
            let replace = match &best {
                Some(current) => candidate.score > current.score,
                None => true,
            };
            if replace {
                best = Some(candidate);
            }
        }
        best
    }

    /// The `k` best intents, descending; ties keep declaration order.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<IntentScore> {
        let mut scores = self.scores(query);
        scores.sort_by(|left, right| right.score.total_cmp(&left.score));
        scores.truncate(k);
        scores
    }
}

/// Cosine similarity; zero vectors and mismatched dimensions score 0.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut left_norm = 0.0_f32;
    let mut right_norm = 0.0_f32;
    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }

    dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[cfg(test)]
mod tests {
    use super::{cosine_similarity, AnchorGroup, AnchorIndex};

    fn index() -> AnchorIndex {
        AnchorIndex::new(vec![
            AnchorGroup { intent: "STORE_WIFI".into(), vectors: vec![vec![1.0, 0.0, 0.0]] },
            AnchorGroup {
                intent: "RULES".into(),
                vectors: vec![vec![0.0, 1.0, 0.0], vec![0.6, 0.8, 0.0]],
            },
            AnchorGroup { intent: "STORE_FEE".into(), vectors: vec![vec![1.0, 0.0, 0.0]] },
        ])
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn best_match_uses_per_intent_maximum() {
        let best = index().best_match(&[0.6, 0.8, 0.0]).expect("a match");
        assert!(best.intent.is("RULES"));
        assert!((best.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_resolve_to_first_declared_intent() {
        let best = index().best_match(&[1.0, 0.0, 0.0]).expect("a match");
        assert!(best.intent.is("STORE_WIFI"));

        let top = index().top_k(&[1.0, 0.0, 0.0], 2);
        let names: Vec<&str> = top.iter().map(|s| s.intent.as_str()).collect();
        assert_eq!(names, vec!["STORE_WIFI", "STORE_FEE"]);
    }

    #[test]
    fn empty_index_has_no_match() {
        assert!(AnchorIndex::default().best_match(&[1.0]).is_none());
        assert!(AnchorIndex::default().is_empty());
    }
}
