use crate::vision::Embedding;

/// Nearest stored embedding that passed the tolerance check
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub index: usize,
    pub distance: f32,
}

/// Euclidean distance between two embeddings
pub fn face_distance(a: &Embedding, b: &Embedding) -> f32 {
    let diff = a - b;
    diff.dot(&diff).sqrt()
}

/// Distance from `query` to every known embedding, in order
pub fn face_distances(known: &[Embedding], query: &Embedding) -> Vec<f32> {
    known.iter().map(|k| face_distance(k, query)).collect()
}

/// Pick the closest known embedding (first one on ties) and accept it only
/// if it is within tolerance. A closer non-match never yields to a farther match.
pub fn find_best_match(known: &[Embedding], query: &Embedding, tolerance: f32) -> Option<MatchResult> {
    let distances = face_distances(known, query);

    let (index, distance) = distances
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (idx, d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ if d.is_nan() => best,
            _ => Some((idx, d)),
        })?;

    if distance <= tolerance {
        Some(MatchResult { index, distance })
    } else {
        None
    }
}
