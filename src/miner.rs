//! Proof-of-work puzzle search and verification
//!
//! A proof `p` is valid against the previous proof `q` when the SHA-256 hex
//! digest of the decimal string `p² − q²` starts with `difficulty` zero
//! characters. Difficulty is a fixed configuration constant.

use crate::hashing::sha256_hex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// How many candidates to try between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

fn puzzle_digest(prev_proof: u64, proof: u64) -> String {
    let delta = (proof as i128) * (proof as i128) - (prev_proof as i128) * (prev_proof as i128);
    sha256_hex(delta.to_string().as_bytes())
}

fn meets_difficulty(digest: &str, difficulty: usize) -> bool {
    digest.len() >= difficulty && digest.bytes().take(difficulty).all(|b| b == b'0')
}

/// Check whether `proof` solves the puzzle posed by `prev_proof`.
pub fn verify(prev_proof: u64, proof: u64, difficulty: usize) -> bool {
    meets_difficulty(&puzzle_digest(prev_proof, proof), difficulty)
}

/// Find the smallest proof, searching upward from 1, that solves the puzzle.
pub fn solve(prev_proof: u64, difficulty: usize) -> u64 {
    let never = AtomicBool::new(false);
    // The flag is never raised, so the search only ends on a solution.
    solve_with_cancel(prev_proof, difficulty, &never).unwrap_or(u64::MAX)
}

/// Like [`solve`], but gives up when `cancel` is raised.
pub fn solve_with_cancel(prev_proof: u64, difficulty: usize, cancel: &AtomicBool) -> Option<u64> {
    info!(prev_proof, difficulty, "Starting proof of work calculation");
    let mut candidate: u64 = 1;
    loop {
        if candidate % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            debug!(candidate, "Proof of work cancelled");
            return None;
        }
        if verify(prev_proof, candidate, difficulty) {
            info!(proof = candidate, "Found proof of work");
            return Some(candidate);
        }
        candidate = candidate.checked_add(1)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solution_verifies() {
        let proof = solve(1, 2);
        assert!(verify(1, proof, 2));
    }

    #[test]
    fn test_solution_is_smallest() {
        let proof = solve(533, 2);
        assert!((1..proof).all(|p| !verify(533, p, 2)));
    }

    #[test]
    fn test_zero_difficulty_accepts_first_candidate() {
        assert_eq!(solve(42, 0), 1);
    }

    #[test]
    fn test_predicate_depends_on_previous_proof() {
        let proof = solve(7, 2);
        let digest = puzzle_digest(7, proof);
        assert!(digest.starts_with("00"));
        assert_eq!(verify(9, proof, 2), puzzle_digest(9, proof).starts_with("00"));
    }

    #[test]
    fn test_raised_flag_cancels_search() {
        let cancel = AtomicBool::new(true);
        // Difficulty 64 has no realistic solution; only cancellation ends the search.
        assert_eq!(solve_with_cancel(1, 64, &cancel), None);
    }

    #[test]
    fn test_negative_delta_is_hashed_with_sign() {
        assert_eq!(puzzle_digest(3, 1), sha256_hex(b"-8"));
    }
}
