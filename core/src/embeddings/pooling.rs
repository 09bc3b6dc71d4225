use super::{model::TokenStates, EmbedderError};

/// Averages the per-position vectors of one text into a single vector.
///
/// Every position counts; masking padding is left to the backend.
pub fn mean_pool(states: &TokenStates) -> Result<Vec<f32>, EmbedderError> {
    let width = states.first().ok_or(EmbedderError::EmptyTokenStates)?.len();
    let mut sum = vec![0.0_f64; width];
    for (position, row) in states.iter().enumerate() {
        if row.len() != width {
            return Err(EmbedderError::RaggedTokenStates {
                position,
                expected: width,
                found: row.len(),
            });
        }
        for (acc, v) in sum.iter_mut().zip(row) {
            *acc += f64::from(*v);
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let positions = states.len() as f64;
    #[allow(clippy::cast_possible_truncation)]
    let pooled = sum.into_iter().map(|v| (v / positions) as f32).collect();
    Ok(pooled)
}

/// Cuts `text` after its first `max_tokens` whitespace-separated tokens.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let mut tokens = 0;
    let mut in_token = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_token = false;
        } else if !in_token {
            if tokens == max_tokens {
                return text[..idx].trim_end();
            }
            tokens += 1;
            in_token = true;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pool() {
        let states = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 0.0]];
        assert_eq!(mean_pool(&states).unwrap(), vec![3.0, 2.0]);
    }

    #[test]
    fn test_mean_pool_rejects_bad_states() {
        assert!(matches!(
            mean_pool(&vec![]),
            Err(EmbedderError::EmptyTokenStates)
        ));
        assert!(matches!(
            mean_pool(&vec![vec![1.0, 2.0], vec![1.0]]),
            Err(EmbedderError::RaggedTokenStates { position: 1, expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_truncate_to_tokens() {
        assert_eq!(truncate_to_tokens("a b c d", 2), "a b");
        assert_eq!(truncate_to_tokens("  a   b  ", 5), "  a   b  ");
        assert_eq!(truncate_to_tokens("héllo wörld again", 2), "héllo wörld");
        assert_eq!(truncate_to_tokens("one", 1), "one");
    }
}
