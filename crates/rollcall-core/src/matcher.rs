use crate::types::{Embedding, StudentIdentity};

/// Result of matching a probe embedding against a roster gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub student: Option<StudentIdentity>,
    /// Cosine similarity of the best candidate seen, whether or not it
    /// cleared the threshold. 0.0 for an empty gallery.
    pub similarity: f32,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        self.student.is_some()
    }
}

/// Strategy for identifying a probe embedding within a session roster.
pub trait Matcher {
    fn identify(&self, probe: &Embedding, roster: &[StudentIdentity], threshold: f32) -> MatchResult;
}

/// Cosine-similarity matcher.
///
/// Scans the full gallery and returns the highest-scoring candidate at or
/// above the threshold, never the first one encountered: storage order must
/// not decide identity. Equal top scores break toward the lowest student
/// number so repeated calls are reproducible.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn identify(&self, probe: &Embedding, roster: &[StudentIdentity], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best: Option<&StudentIdentity> = None;

        for student in roster {
            // Roster members without a stored embedding are not in the gallery.
            let Some(stored) = &student.embedding else {
                continue;
            };
            let sim = probe.similarity(stored);

            let wins = match best {
                None => true,
                Some(prev) => {
                    sim > best_sim
                        || (sim == best_sim && student.student_number < prev.student_number)
                }
            };
            if wins {
                best_sim = sim;
                best = Some(student);
            }
        }

        match best {
            Some(student) if best_sim >= threshold => MatchResult {
                student: Some(student.clone()),
                similarity: best_sim,
            },
            _ => MatchResult {
                student: None,
                similarity: if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(number: &str, values: Vec<f32>) -> StudentIdentity {
        StudentIdentity {
            student_number: number.to_string(),
            name: format!("Student {number}"),
            embedding: Some(Embedding { values, model_version: None }),
            image_path: None,
        }
    }

    #[test]
    fn test_best_match_beats_first_above_threshold() {
        // Both clear the threshold, but the second scores higher; storage
        // order must not win.
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let roster = vec![
            student("2001", vec![0.8, 0.6]),  // sim 0.8
            student("2002", vec![1.0, 0.05]), // sim ~0.999
        ];

        let result = CosineMatcher.identify(&probe, &roster, 0.7);
        assert_eq!(
            result.student.as_ref().map(|s| s.student_number.as_str()),
            Some("2002")
        );
        assert!(result.similarity > 0.99);
    }

    #[test]
    fn test_tie_breaks_to_lowest_student_number() {
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let roster = vec![
            student("2009", vec![1.0, 0.0]),
            student("2003", vec![1.0, 0.0]),
            student("2005", vec![1.0, 0.0]),
        ];

        let result = CosineMatcher.identify(&probe, &roster, 0.7);
        assert_eq!(
            result.student.as_ref().map(|s| s.student_number.as_str()),
            Some("2003")
        );
    }

    #[test]
    fn test_below_threshold_returns_none_with_score() {
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let roster = vec![student("2001", vec![0.0, 1.0])];

        let result = CosineMatcher.identify(&probe, &roster, 0.7);
        assert!(!result.matched());
        assert!(result.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_empty_gallery_is_not_an_error() {
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let result = CosineMatcher.identify(&probe, &[], 0.7);
        assert!(!result.matched());
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_students_without_embeddings_are_skipped() {
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let roster = vec![StudentIdentity {
            student_number: "2001".into(),
            name: "No Face On File".into(),
            embedding: None,
            image_path: None,
        }];

        let result = CosineMatcher.identify(&probe, &roster, 0.0);
        assert!(!result.matched());
    }

    #[test]
    fn test_threshold_monotonicity() {
        // Raising the threshold can only turn a match into a non-match.
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let roster = vec![student("2001", vec![0.8, 0.6])]; // sim 0.8

        let low = CosineMatcher.identify(&probe, &roster, 0.5);
        let high = CosineMatcher.identify(&probe, &roster, 0.9);
        assert!(low.matched());
        assert!(!high.matched());
        assert_eq!(low.similarity, high.similarity);
    }

    #[test]
    fn test_exact_threshold_is_a_match() {
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let roster = vec![student("2001", vec![1.0, 0.0])]; // sim 1.0

        let result = CosineMatcher.identify(&probe, &roster, 1.0);
        assert!(result.matched());
    }
}
