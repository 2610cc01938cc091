//! CAPTCHA generation and verification.
//!
//! Challenges are small additions. The answer is recomputed from the
//! challenge text, so any task can verify without shared generator state.

mod generator;
mod verifier;

pub use generator::ChallengeGenerator;
pub use verifier::{answer_options, parse_numeric_answer, verify};
