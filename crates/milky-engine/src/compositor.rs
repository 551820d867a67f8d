//! Builds the system instruction for a turn from persisted state and the
//! static persona settings.
//!
//! Layers, in order:
//! 1. base prompt
//! 2. dev mode annotation
//! 3. active persona body
//! 4. short-reply directive
//! 5. heat directive
//! 6. anti-repetition directive (always)
//! 7. emoji guide, or the standard-emoji fallback
//! 8. global interaction digest
//!
//! Output is cached per store revision and emoji sampling is seeded from the
//! revision, so two calls without an intervening mutation return the same text.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use milky_core::{BotMode, EmojiDescriptor, GlobalMemoryEntry};
use milky_settings::PersonaSettings;
use milky_store::StateStore;

pub const DEV_MODE_DIRECTIVE: &str = "[Developer mode] Favor technical precision. When the \
question is about code, answer with working code and short, concrete explanations.";

pub const HEAT_DIRECTIVE: &str = "[Heat mode] Be far more intimate and affectionate than usual, \
eager and yielding in tone.";

pub const ANTI_REPETITION_DIRECTIVE: &str = "Never repeat earlier replies or the user's words \
verbatim. Every reply must be freshly worded.";

pub const EMOJI_FALLBACK_DIRECTIVE: &str = "Use standard Unicode emoji or common :shortcode: \
emoji where they fit. No custom emoji are available.";

const DIGEST_HEADER: &str = "Recent interactions in other conversations (background only, \
do not quote directly):";

pub struct PromptCompositor {
    store: Arc<StateStore>,
    persona: PersonaSettings,
    emoji_guide_cap: usize,
    digest_size: usize,
    cache: Mutex<Option<(u64, String)>>,
}

impl PromptCompositor {
    pub fn new(
        store: Arc<StateStore>,
        persona: PersonaSettings,
        emoji_guide_cap: usize,
        digest_size: usize,
    ) -> Self {
        Self {
            store,
            persona,
            emoji_guide_cap,
            digest_size,
            cache: Mutex::new(None),
        }
    }

    /// The layered instruction for the current state. Never fails.
    pub fn compose_instruction(&self) -> String {
        let revision = self.store.revision();
        if let Some((cached_rev, text)) = self.cache.lock().as_ref() {
            if *cached_rev == revision {
                return text.clone();
            }
        }
        let text = self.build(revision);
        *self.cache.lock() = Some((revision, text.clone()));
        text
    }

    fn build(&self, revision: u64) -> String {
        let (flags, persona_body, described, digest) = self.store.read(|s| {
            let persona_body = s
                .flags
                .active_persona
                .as_ref()
                .and_then(|name| s.personas.get(name).cloned());
            let described: Vec<EmojiDescriptor> = s
                .emojis
                .values()
                .filter(|e| e.description.as_deref().is_some_and(|d| !d.trim().is_empty()))
                .cloned()
                .collect();
            let start = s.global_memory.len().saturating_sub(self.digest_size);
            (s.flags.clone(), persona_body, described, s.global_memory[start..].to_vec())
        });

        let mut layers: Vec<String> = Vec::with_capacity(8);

        layers.push(self.persona.base_prompt.clone());

        if flags.bot_mode == BotMode::Dev {
            layers.push(DEV_MODE_DIRECTIVE.to_string());
        }

        if let Some(body) = persona_body.filter(|b| !b.trim().is_empty()) {
            layers.push(body);
        }

        if flags.short_reply_mode {
            layers.push(short_reply_directive(&self.persona.short_reply_delimiter));
        }

        if flags.heat_mode {
            layers.push(HEAT_DIRECTIVE.to_string());
        }

        layers.push(ANTI_REPETITION_DIRECTIVE.to_string());

        layers.push(self.emoji_guide(described, revision));

        if !digest.is_empty() && self.digest_size > 0 {
            layers.push(format_digest(&digest));
        }

        layers.join("\n\n")
    }

    fn emoji_guide(&self, mut described: Vec<EmojiDescriptor>, revision: u64) -> String {
        if described.is_empty() || self.emoji_guide_cap == 0 {
            return EMOJI_FALLBACK_DIRECTIVE.to_string();
        }
        if described.len() > self.emoji_guide_cap {
            let mut rng = StdRng::seed_from_u64(revision);
            described = described
                .choose_multiple(&mut rng, self.emoji_guide_cap)
                .cloned()
                .collect();
            described.sort_by_key(|e| e.id);
        }
        let mut out = String::from(
            "Custom emoji you may use. Write the insertion form exactly as shown:\n",
        );
        for emoji in &described {
            out.push_str(&format!(
                "- {} → {} ({})\n",
                emoji.name,
                emoji.insertion_form(),
                emoji.description.as_deref().unwrap_or_default().trim()
            ));
        }
        out.truncate(out.trim_end().len());
        out
    }
}

pub fn short_reply_directive(delimiter: &str) -> String {
    format!(
        "[Short replies] Answer in several short clauses instead of paragraphs. \
         Put {delimiter} between clauses, never line breaks."
    )
}

fn format_digest(entries: &[GlobalMemoryEntry]) -> String {
    let mut out = String::from(DIGEST_HEADER);
    for entry in entries {
        out.push_str(&format!(
            "\n- [{}] {}: {} / you: {}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.user_name,
            entry.message,
            entry.bot_reply
        ));
    }
    out
}
