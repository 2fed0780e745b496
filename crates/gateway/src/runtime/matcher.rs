//! Transcript-to-option matching.
//!
//! A pure priority chain: spoken ordinal, yes/no (binary permission
//! prompts only), direct substring, fuzzy similarity, then verbatim.
//! First hit wins. Confidence encodes how sure each strategy is; the
//! voice engine gates dispatch on it.

use echo_domain::{BlockReason, MatchMethod};

/// Similarity floor for a fuzzy hit.
const FUZZY_FLOOR: f64 = 0.6;
/// Confidence of a verbatim fall-through when options were offered,
/// deliberately below any dispatch threshold.
const VERBATIM_FALLBACK_CONFIDENCE: f64 = 0.3;

const AFFIRMATIVE: [&str; 5] = ["yes", "yeah", "yep", "sure", "allow"];
const NEGATIVE: [&str; 5] = ["no", "nah", "nope", "deny", "reject"];

const ORDINAL_WORDS: [(&str, usize); 30] = [
    ("one", 0),
    ("first", 0),
    ("1", 0),
    ("two", 1),
    ("second", 1),
    ("2", 1),
    ("three", 2),
    ("third", 2),
    ("3", 2),
    ("four", 3),
    ("fourth", 3),
    ("4", 3),
    ("five", 4),
    ("fifth", 4),
    ("5", 4),
    ("six", 5),
    ("sixth", 5),
    ("6", 5),
    ("seven", 6),
    ("seventh", 6),
    ("7", 6),
    ("eight", 7),
    ("eighth", 7),
    ("8", 7),
    ("nine", 8),
    ("ninth", 8),
    ("9", 8),
    ("ten", 9),
    ("tenth", 9),
    ("10", 9),
];

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// The text to dispatch (an option, or the transcript itself).
    pub text: String,
    pub confidence: f64,
    pub method: MatchMethod,
}

/// Match a transcript against the offered options.
pub fn match_response(
    transcript: &str,
    options: Option<&[String]>,
    block_reason: Option<BlockReason>,
) -> MatchResult {
    let cleaned = transcript.trim();
    let normalized = cleaned.to_lowercase();

    let Some(options) = options.filter(|o| !o.is_empty()) else {
        return MatchResult {
            text: cleaned.to_string(),
            confidence: 1.0,
            method: MatchMethod::Verbatim,
        };
    };

    if let Some(index) = ordinal_index(&normalized) {
        if index < options.len() {
            return MatchResult {
                text: options[index].clone(),
                confidence: 0.95,
                method: MatchMethod::Ordinal,
            };
        }
    }

    if options.len() == 2 && block_reason == Some(BlockReason::PermissionPrompt) {
        if let Some(result) = yes_no_match(&normalized, options) {
            return result;
        }
    }

    if let Some(result) = direct_match(&normalized, options) {
        return result;
    }

    if let Some(result) = fuzzy_match(&normalized, options) {
        return result;
    }

    MatchResult {
        text: cleaned.to_string(),
        confidence: VERBATIM_FALLBACK_CONFIDENCE,
        method: MatchMethod::Verbatim,
    }
}

/// First token that names an ordinal, e.g. "option two" → 1.
fn ordinal_index(normalized: &str) -> Option<usize> {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .find_map(|token| {
            ORDINAL_WORDS
                .iter()
                .find(|(word, _)| *word == token)
                .map(|&(_, index)| index)
        })
}

fn yes_no_match(normalized: &str, options: &[String]) -> Option<MatchResult> {
    let tokens: Vec<&str> = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let affirmative =
        tokens.iter().any(|t| AFFIRMATIVE.contains(t)) || normalized.contains("go ahead");
    let negative = tokens.iter().any(|t| NEGATIVE.contains(t));

    let index = match (affirmative, negative) {
        (true, false) => 0,
        (false, true) => 1,
        _ => return None,
    };
    Some(MatchResult {
        text: options[index].clone(),
        confidence: 0.9,
        method: MatchMethod::YesNo,
    })
}

/// Case-insensitive substring: the longest option contained in the
/// transcript wins.
fn direct_match(normalized: &str, options: &[String]) -> Option<MatchResult> {
    options
        .iter()
        .filter(|opt| !opt.is_empty() && normalized.contains(&opt.to_lowercase()))
        .max_by_key(|opt| opt.len())
        .map(|opt| MatchResult {
            text: opt.clone(),
            confidence: 0.85,
            method: MatchMethod::Direct,
        })
}

/// Similarity argmax over the options; a hit requires the ratio to clear
/// the floor.
fn fuzzy_match(normalized: &str, options: &[String]) -> Option<MatchResult> {
    options
        .iter()
        .map(|opt| {
            let ratio = strsim::normalized_levenshtein(normalized, &opt.to_lowercase());
            (opt, ratio)
        })
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .filter(|&(_, ratio)| ratio >= FUZZY_FLOOR)
        .map(|(opt, ratio)| MatchResult {
            text: opt.clone(),
            confidence: ratio,
            method: MatchMethod::Fuzzy,
        })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ordinal_words_map_to_indices() {
        let options = opts(&["RS256", "HS256"]);
        let m = match_response("option one", Some(&options), None);
        assert_eq!(m.text, "RS256");
        assert_eq!(m.method, MatchMethod::Ordinal);
        assert_eq!(m.confidence, 0.95);

        let m = match_response("The second", Some(&options), None);
        assert_eq!(m.text, "HS256");
    }

    #[test]
    fn option_ten_maps_to_the_tenth_entry() {
        let options: Vec<String> = (1..=10).map(|i| format!("choice-{i}")).collect();
        let m = match_response("option ten", Some(&options), None);
        assert_eq!(m.text, "choice-10");
        assert_eq!(m.method, MatchMethod::Ordinal);
    }

    #[test]
    fn out_of_range_ordinal_falls_through() {
        let options = opts(&["a", "b"]);
        let m = match_response("five", Some(&options), None);
        assert_ne!(m.method, MatchMethod::Ordinal);
    }

    #[test]
    fn yes_no_only_for_binary_permission_prompts() {
        let options = opts(&["Allow", "Deny"]);
        let m = match_response(
            "yeah go ahead",
            Some(&options),
            Some(BlockReason::PermissionPrompt),
        );
        assert_eq!(m.text, "Allow");
        assert_eq!(m.method, MatchMethod::YesNo);
        assert_eq!(m.confidence, 0.9);

        let m = match_response("nope", Some(&options), Some(BlockReason::PermissionPrompt));
        assert_eq!(m.text, "Deny");

        // Same words for a question: yes/no does not apply.
        let m = match_response("yes", Some(&options), Some(BlockReason::Question));
        assert_ne!(m.method, MatchMethod::YesNo);
    }

    #[test]
    fn conflicting_yes_and_no_falls_through() {
        let options = opts(&["Allow", "Deny"]);
        let m = match_response(
            "yes no maybe",
            Some(&options),
            Some(BlockReason::PermissionPrompt),
        );
        assert_ne!(m.method, MatchMethod::YesNo);
    }

    #[test]
    fn direct_substring_prefers_the_longest_option() {
        let options = opts(&["run tests", "run tests and lint"]);
        let m = match_response("please run tests and lint now", Some(&options), None);
        assert_eq!(m.text, "run tests and lint");
        assert_eq!(m.method, MatchMethod::Direct);
        assert_eq!(m.confidence, 0.85);
    }

    #[test]
    fn fuzzy_match_clears_the_floor() {
        let options = opts(&["refactor", "rollback"]);
        let m = match_response("refactr", Some(&options), None);
        assert_eq!(m.text, "refactor");
        assert_eq!(m.method, MatchMethod::Fuzzy);
        assert!(m.confidence >= 0.6);
    }

    #[test]
    fn hopeless_transcript_falls_back_to_low_confidence_verbatim() {
        let options = opts(&["Allow", "Deny"]);
        let m = match_response("purple elephant parade", Some(&options), None);
        assert_eq!(m.method, MatchMethod::Verbatim);
        assert_eq!(m.text, "purple elephant parade");
        assert!(m.confidence < 0.6);
    }

    #[test]
    fn no_options_means_full_confidence_verbatim() {
        let m = match_response("  deploy to staging  ", None, None);
        assert_eq!(m.text, "deploy to staging");
        assert_eq!(m.confidence, 1.0);
        assert_eq!(m.method, MatchMethod::Verbatim);

        let empty: Vec<String> = vec![];
        let m = match_response("deploy", Some(&empty), None);
        assert_eq!(m.method, MatchMethod::Verbatim);
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn matching_is_a_pure_function() {
        let options = opts(&["Allow", "Deny"]);
        let a = match_response("option one", Some(&options), None);
        let b = match_response("option one", Some(&options), None);
        assert_eq!(a, b);
    }
}
