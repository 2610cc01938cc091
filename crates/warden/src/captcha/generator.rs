//! CAPTCHA generation.
//!
//! Difficulty is deliberately low: the point is to stop join-bots, not humans.

use rand::Rng;
use warden_common::Challenge;
use warden_common::constants::MAX_OPERAND;

/// Challenge generator service
#[derive(Debug, Clone)]
pub struct ChallengeGenerator {
    /// Largest operand (inclusive)
    max_operand: u8,
}

impl Default for ChallengeGenerator {
    fn default() -> Self {
        Self::new(MAX_OPERAND)
    }
}

impl ChallengeGenerator {
    pub fn new(max_operand: u8) -> Self {
        Self {
            max_operand: max_operand.clamp(1, MAX_OPERAND),
        }
    }

    /// Generate a new challenge
    ///
    /// Returns (challenge, correct_answer)
    pub fn generate(&self) -> (Challenge, i64) {
        self.generate_with(&mut rand::rng())
    }

    pub fn generate_with(&self, rng: &mut impl Rng) -> (Challenge, i64) {
        let lhs = rng.random_range(1..=self.max_operand);
        let rhs = rng.random_range(1..=self.max_operand);
        let challenge = Challenge::clamped(lhs, rhs);

        tracing::trace!(challenge = %challenge, "Generated challenge");

        (challenge, challenge.answer())
    }
}
