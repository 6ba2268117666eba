//! Candidate assembly helpers: score clamping and result ordering.

use crate::ledger::Candidate;

/// Clamp a score into [0, 1].
pub fn clamp_unit(score: f64) -> f64 {
    score.clamp(0.0, 1.0)
}

/// Canonical result order: rerank score descending, similarity descending,
/// target control key ascending.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.rerank_score
            .total_cmp(&a.rerank_score)
            .then(b.similarity_score.total_cmp(&a.similarity_score))
            .then_with(|| a.target_control_key.cmp(&b.target_control_key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, similarity: f64, rerank: f64) -> Candidate {
        Candidate {
            target_control_key: format!("NIST#R5#{id}").parse().unwrap(),
            target_control_id: id.to_string(),
            similarity_score: similarity,
            rerank_score: rerank,
            reasoning: String::new(),
        }
    }

    #[test]
    fn clamps_scores_into_unit_interval() {
        assert_eq!(clamp_unit(-0.25), 0.0);
        assert_eq!(clamp_unit(0.0), 0.0);
        assert_eq!(clamp_unit(0.73), 0.73);
        assert_eq!(clamp_unit(1.2), 1.0);
    }

    #[test]
    fn sorts_by_rerank_then_similarity_then_key() {
        let mut candidates = vec![
            candidate("AC-3", 0.70, 0.55),
            candidate("AC-1", 0.90, 0.92),
            candidate("AC-5", 0.40, 0.55),
            candidate("AC-4", 0.40, 0.55),
        ];
        sort_candidates(&mut candidates);

        let order: Vec<&str> = candidates.iter().map(|c| c.target_control_id.as_str()).collect();
        assert_eq!(order, vec!["AC-1", "AC-3", "AC-4", "AC-5"]);
    }

    #[test]
    fn sort_is_stable_for_full_ties() {
        let mut candidates = vec![candidate("B", 0.5, 0.5), candidate("A", 0.5, 0.5)];
        sort_candidates(&mut candidates);
        assert_eq!(candidates[0].target_control_id, "A");
    }
}
