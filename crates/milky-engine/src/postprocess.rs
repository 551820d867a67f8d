//! Text transforms applied to user input and model replies.

use std::sync::LazyLock;

use regex::Regex;

use milky_core::EmojiDescriptor;

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?(\d+)>").expect("valid mention pattern"));

static SHORTCODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":([A-Za-z0-9_]{2,32}):").expect("valid shortcode pattern"));

/// Remove mentions of `bot_id` (`<@id>` and `<@!id>`) and trim.
/// Without a bot id every mention is stripped.
pub fn strip_mentions(text: &str, bot_id: Option<u64>) -> String {
    MENTION_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let id = caps[1].parse::<u64>().ok();
            match bot_id {
                Some(bot) if id != Some(bot) => caps[0].to_string(),
                _ => String::new(),
            }
        })
        .trim()
        .to_string()
}

/// Replace every case-insensitive occurrence of each word with `*` of the
/// same character length.
pub fn mask_filtered_words(text: &str, words: &[String]) -> String {
    let mut out = text.to_string();
    for word in words.iter().filter(|w| !w.is_empty()) {
        let Ok(re) = Regex::new(&format!("(?i){}", regex::escape(word))) else {
            continue;
        };
        out = re
            .replace_all(&out, |caps: &regex::Captures<'_>| "*".repeat(caps[0].chars().count()))
            .into_owned();
    }
    out
}

/// Expand `:name:` to the emoji's insertion form when `lookup` knows the
/// name. Codes already inside an insertion form are left alone.
pub fn expand_shortcodes(text: &str, lookup: impl Fn(&str) -> Option<EmojiDescriptor>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in SHORTCODE_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let prefix = &text[..whole.start()];
        let inside_insertion = prefix.ends_with('<') || prefix.ends_with("<a");
        let replacement = if inside_insertion {
            None
        } else {
            lookup(&caps[1]).map(|e| e.insertion_form())
        };
        out.push_str(&text[last..whole.start()]);
        match replacement {
            Some(form) => out.push_str(&form),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Split on `delimiter` into trimmed, non-empty segments.
pub fn segment_reply(text: &str, delimiter: &str) -> Vec<String> {
    if delimiter.is_empty() {
        return vec![text.trim().to_string()];
    }
    text.split(delimiter)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave() -> EmojiDescriptor {
        EmojiDescriptor {
            id: 55,
            name: "Wave".into(),
            url: String::new(),
            animated: true,
            guild_id: 1,
            description: None,
        }
    }

    #[test]
    fn strips_bot_mentions_only() {
        assert_eq!(strip_mentions("<@42> hello", Some(42)), "hello");
        assert_eq!(strip_mentions("<@!42>  hi <@7>", Some(42)), "hi <@7>");
        assert_eq!(strip_mentions("<@42>", Some(42)), "");
        assert_eq!(strip_mentions("<@1> <@!2> yo", None), "yo");
    }

    #[test]
    fn masks_case_insensitively_with_equal_length() {
        let words = vec!["darn".to_string(), "héé".to_string()];
        assert_eq!(mask_filtered_words("Darn it, darn!", &words), "**** it, ****!");
        assert_eq!(mask_filtered_words("ohhéé", &words), "oh***");
        assert_eq!(mask_filtered_words("clean", &words), "clean");
    }

    #[test]
    fn expands_known_shortcodes() {
        let lookup = |name: &str| name.eq_ignore_ascii_case("wave").then(wave);
        assert_eq!(expand_shortcodes("hi :wave:", lookup), "hi <a:Wave:55>");
        assert_eq!(expand_shortcodes("hi :unknown:", lookup), "hi :unknown:");
        assert_eq!(expand_shortcodes("keep <a:wave:55>", lookup), "keep <a:wave:55>");
        assert_eq!(expand_shortcodes("at 10:30:00", lookup), "at 10:30:00");
    }

    #[test]
    fn segments_drop_blanks() {
        assert_eq!(
            segment_reply("a [SPLIT] b[SPLIT][SPLIT] c ", "[SPLIT]"),
            vec!["a", "b", "c"]
        );
        assert_eq!(segment_reply("single", "[SPLIT]"), vec!["single"]);
    }
}
