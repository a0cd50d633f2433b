// libs/appointment-cell/src/services/confirmation.rs
use rand::Rng;
use std::future::Future;
use tracing::warn;

use crate::models::SchedulingError;

/// Retry bound for the draw-and-check loop. Expected attempts are ~1 while
/// utilization stays low; the bound only matters as the code space
/// approaches exhaustion, at which point `GenerationFailed` is surfaced
/// rather than looping forever. Growing the code space or switching to a
/// sequence is the real fix once that ever happens.
pub const MAX_CODE_ATTEMPTS: usize = 32;

/// Draw one candidate uniformly from the 26,000-code space: one uppercase
/// letter followed by three digits. Chosen for human readability (dictated
/// over the phone, typed into a search box) over entropy.
pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let letter = rng.gen_range(b'A'..=b'Z') as char;
    let digits: u32 = rng.gen_range(0..1000);
    format!("{}{:03}", letter, digits)
}

pub fn is_valid_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 4
        && bytes[0].is_ascii_uppercase()
        && bytes[1..].iter().all(|b| b.is_ascii_digit())
}

/// Draw candidates until `exists` reports one as unused, up to
/// `MAX_CODE_ATTEMPTS` draws.
pub async fn generate_unique_code<F, Fut>(mut exists: F) -> Result<String, SchedulingError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, SchedulingError>>,
{
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let candidate = random_code(&mut rand::thread_rng());

        if !exists(candidate.clone()).await? {
            return Ok(candidate);
        }

        warn!(
            "Confirmation code collision on attempt {}/{}",
            attempt, MAX_CODE_ATTEMPTS
        );
    }

    Err(SchedulingError::GenerationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn codes_match_the_expected_format() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let code = random_code(&mut rng);
            assert!(is_valid_code(&code), "bad code: {}", code);
        }
    }

    #[test]
    fn format_validation_rejects_near_misses() {
        assert!(is_valid_code("A123"));
        assert!(is_valid_code("Z000"));
        assert!(!is_valid_code("a123"));
        assert!(!is_valid_code("1234"));
        assert!(!is_valid_code("AB12"));
        assert!(!is_valid_code("A12"));
        assert!(!is_valid_code("A1234"));
        assert!(!is_valid_code(""));
    }

    #[tokio::test]
    async fn returns_first_unused_code() {
        let code = generate_unique_code(|_| async { Ok(false) }).await.unwrap();
        assert!(is_valid_code(&code));
    }

    #[tokio::test]
    async fn skips_codes_already_issued() {
        // Report the first candidate as taken and track every draw.
        let mut draws = Vec::new();

        let code = generate_unique_code(|candidate| {
            let taken = draws.is_empty();
            draws.push(candidate);
            async move { Ok(taken) }
        })
        .await
        .unwrap();

        assert!(is_valid_code(&code));
        assert_eq!(draws.len(), 2, "expected exactly one redraw");
        assert_eq!(code, draws[1]);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let mut calls = 0;
        let result = generate_unique_code(|_| {
            calls += 1;
            async { Ok(true) }
        })
        .await;

        assert_matches!(result, Err(SchedulingError::GenerationFailed));
        assert_eq!(calls, MAX_CODE_ATTEMPTS);
    }

    #[tokio::test]
    async fn propagates_store_failures() {
        let result = generate_unique_code(|_| async {
            Err(SchedulingError::StorageError("store down".to_string()))
        })
        .await;

        assert_matches!(result, Err(SchedulingError::StorageError(_)));
    }
}
