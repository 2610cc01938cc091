//! CAPTCHA verification logic.

use rand::seq::SliceRandom;
use warden_common::Challenge;

/// Offsets of the wrong choices shown next to the correct answer.
/// None is zero, and the smallest answer is 2, so all choices stay distinct
/// and positive.
const DISTRACTOR_OFFSETS: [i64; 3] = [1, -1, 2];

/// Check a submitted answer against the challenge
pub fn verify(challenge: &Challenge, answer: i64) -> bool {
    challenge.answer() == answer
}

/// Correct answer plus three distractors, in random order
pub fn answer_options(challenge: &Challenge) -> [i64; 4] {
    answer_options_with(challenge, &mut rand::rng())
}

fn answer_options_with(challenge: &Challenge, rng: &mut impl rand::Rng) -> [i64; 4] {
    let correct = challenge.answer();
    let mut options = [
        correct,
        correct + DISTRACTOR_OFFSETS[0],
        correct + DISTRACTOR_OFFSETS[1],
        correct + DISTRACTOR_OFFSETS[2],
    ];
    options.shuffle(rng);
    options
}

/// Interpret a chat message as an answer. Only a bare integer counts.
pub fn parse_numeric_answer(text: &str) -> Option<i64> {
    text.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::ChallengeGenerator;

    #[test]
    fn test_verify_accepts_only_answer() {
        let generator = ChallengeGenerator::default();
        for _ in 0..200 {
            let (challenge, answer) = generator.generate();
            assert!(verify(&challenge, answer));
            assert!(!verify(&challenge, answer + 1));
            assert!(!verify(&challenge, answer - 1));
        }
    }

    #[test]
    fn test_answer_options_distinct_and_contain_answer() {
        let challenge = Challenge::new(1, 1).unwrap();
        let mut options = answer_options(&challenge);
        assert!(options.contains(&2));
        options.sort_unstable();
        assert_eq!(options, [1, 2, 3, 4]);

        let challenge = Challenge::new(7, 5).unwrap();
        let mut options = answer_options(&challenge);
        options.sort_unstable();
        assert_eq!(options, [11, 12, 13, 14]);
    }

    #[test]
    fn test_parse_numeric_answer() {
        assert_eq!(parse_numeric_answer(" 12 \n"), Some(12));
        assert_eq!(parse_numeric_answer("-3"), Some(-3));
        assert_eq!(parse_numeric_answer("twelve"), None);
        assert_eq!(parse_numeric_answer("12 please"), None);
        assert_eq!(parse_numeric_answer(""), None);
    }
}
