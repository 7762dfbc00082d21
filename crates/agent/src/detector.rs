/// Affirmative and temporal markers that suggest the customer just
/// committed to something. Deliberately broad ("on ", "by "): this is a
/// cheap pre-filter deciding whether to pay for an extraction call, not
/// the authority on whether a commitment happened. The validator is the
/// gate.
const COMMITMENT_MARKERS: &[&str] = &[
    "yes",
    "okay",
    "ok",
    "alright",
    "i will",
    "i'll",
    "i can",
    "sure",
    "agree",
    "deal",
    "commit",
    "tomorrow",
    "today",
    "next week",
    "on ",
    "by ",
];

/// Case-insensitive substring check over the marker list. Pure; false
/// positives are expected and acceptable.
pub fn looks_like_commitment(utterance: &str) -> bool {
    let lowered = utterance.to_lowercase();
    COMMITMENT_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::looks_like_commitment;

    #[test]
    fn affirmative_phrases_match() {
        for utterance in [
            "Yes, that works for me",
            "OKAY let's do it",
            "I'll pay on Friday",
            "I can manage 150 by the 20th",
            "sounds like a deal",
            "I commit to paying tomorrow",
        ] {
            assert!(looks_like_commitment(utterance), "expected match: {utterance}");
        }
    }

    #[test]
    fn neutral_phrases_do_not_match() {
        for utterance in ["my business slowed down", "what are my choices", "I need more time"] {
            assert!(!looks_like_commitment(utterance), "expected no match: {utterance}");
        }
    }

    #[test]
    fn detector_is_monotonic_in_its_markers() {
        let base = "my business slowed";
        assert!(!looks_like_commitment(base));

        // Appending any matching marker flips the result to true, and no
        // extra text can flip a match back to false.
        let extended = format!("{base}, but yes");
        assert!(looks_like_commitment(&extended));
        let padded = format!("unrelated prefix {extended} unrelated suffix");
        assert!(looks_like_commitment(&padded));
    }

    #[test]
    fn broad_temporal_markers_fire_on_ordinary_sentences() {
        // Known over-trigger, accepted by design: the validator decides.
        assert!(looks_like_commitment("it depends on the weather"));
    }
}
