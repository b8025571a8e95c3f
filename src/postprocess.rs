use rand::Rng;

pub const MOOD_MARKER: &str = "[MOOD:";
pub const VOICE_MARKER: &str = "[VOICE]";

/// Split a raw model reply into (display text, mood).
///
/// The mood value is everything between the first `[MOOD:` and the next
/// `]`, trimmed; text before the marker becomes the display text. A marker
/// with no closing bracket is a parse failure: the raw text is kept as-is
/// and the prior mood is retained.
pub fn extract_mood(raw: &str, prior_mood: &str) -> (String, String) {
    if let Some(marker_idx) = raw.find(MOOD_MARKER) {
        let after = &raw[marker_idx + MOOD_MARKER.len()..];
        if let Some(end) = after.find(']') {
            let mood = after[..end].trim().to_string();
            let display = raw[..marker_idx].trim().to_string();
            return (display, mood);
        }
    }
    (raw.to_string(), prior_mood.to_string())
}

/// Casual-texting mutation: 80% lowercase the first character, 90% drop a
/// trailing period, and for each space-delimited word longer than 3 chars
/// a 2% chance of swapping two interior-adjacent characters.
///
/// Draw order is fixed (case, period, then per-word left to right) so a
/// seeded rng reproduces the exact same output.
pub fn humanize<R: Rng>(text: &str, rng: &mut R) -> String {
    if text.is_empty() {
        return text.to_string();
    }

    let mut text = text.to_string();

    if rng.gen::<f64>() < 0.8 {
        let mut chars = text.chars();
        if let Some(first) = chars.next() {
            let rest: String = chars.collect();
            text = first.to_lowercase().chain(rest.chars()).collect();
        }
    }

    if text.ends_with('.') && rng.gen::<f64>() < 0.9 {
        text.pop();
    }

    let words: Vec<String> = text
        .split(' ')
        .map(|word| {
            let len = word.chars().count();
            if len > 3 && rng.gen::<f64>() < 0.02 {
                transpose_interior(word, rng)
            } else {
                word.to_string()
            }
        })
        .collect();

    words.join(" ")
}

fn transpose_interior<R: Rng>(word: &str, rng: &mut R) -> String {
    let mut chars: Vec<char> = word.chars().collect();
    if chars.len() < 4 {
        return word.to_string();
    }
    let idx = rng.gen_range(1..=chars.len() - 2);
    chars.swap(idx, idx + 1);
    chars.into_iter().collect()
}

/// If the reply carries the voice marker anywhere, return the text with
/// every marker stripped; the caller treats the reply as voice-only.
pub fn take_voice_marker(text: &str) -> Option<String> {
    if text.contains(VOICE_MARKER) {
        Some(text.replace(VOICE_MARKER, "").trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn mood_tag_is_stripped_and_returned() {
        let (display, mood) = extract_mood("hey! [MOOD: Happy]", "Chill");
        assert_eq!(display, "hey!");
        assert_eq!(mood, "Happy");
        assert!(!display.contains("[MOOD:"));
    }

    #[test]
    fn missing_marker_keeps_prior_mood() {
        let (display, mood) = extract_mood("just a normal reply", "Annoyed");
        assert_eq!(display, "just a normal reply");
        assert_eq!(mood, "Annoyed");
    }

    #[test]
    fn unterminated_marker_is_a_parse_failure() {
        let raw = "hey! [MOOD: Happy";
        let (display, mood) = extract_mood(raw, "Chill");
        assert_eq!(display, raw);
        assert_eq!(mood, "Chill");
    }

    #[test]
    fn mood_value_is_trimmed() {
        let (_, mood) = extract_mood("ok [MOOD:   Tired  ]", "Chill");
        assert_eq!(mood, "Tired");
    }

    #[test]
    fn humanize_is_deterministic_under_a_fixed_seed() {
        let input = "Honestly the gym was packed today.";
        let a = humanize(input, &mut StdRng::seed_from_u64(42));
        let b = humanize(input, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn humanize_changes_length_by_at_most_one() {
        let input = "Honestly the gym was packed today.";
        for seed in 0..50 {
            let out = humanize(input, &mut StdRng::seed_from_u64(seed));
            let diff = input.chars().count() as i64 - out.chars().count() as i64;
            assert!((0..=1).contains(&diff), "seed {}: {:?}", seed, out);
        }
    }

    #[test]
    fn humanize_preserves_word_count_and_word_lengths() {
        let input = "client wants the logo bigger again";
        for seed in 0..50 {
            let out = humanize(input, &mut StdRng::seed_from_u64(seed));
            let in_words: Vec<&str> = input.split(' ').collect();
            let out_words: Vec<&str> = out.split(' ').collect();
            assert_eq!(in_words.len(), out_words.len());
            for (a, b) in in_words.iter().zip(&out_words) {
                assert_eq!(a.chars().count(), b.chars().count());
            }
        }
    }

    #[test]
    fn humanize_keeps_short_words_untouched() {
        // every word is <= 3 chars, so only the leading case draw applies
        let out = humanize("ya ok so", &mut StdRng::seed_from_u64(7));
        assert_eq!(out, "ya ok so");
    }

    #[test]
    fn voice_marker_is_detected_and_stripped() {
        let cleaned = take_voice_marker("[VOICE] on my way").unwrap();
        assert_eq!(cleaned, "on my way");
        assert!(take_voice_marker("no marker here").is_none());
    }
}
