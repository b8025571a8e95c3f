use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;

use crate::characters::CharacterConfig;

const ABSENCE_GAP_HOURS: i64 = 24;

pub const RANDOM_EVENTS: [&str; 10] = [
    "You just spilled hot coffee on your shirt.",
    "Your internet just disconnected for a second.",
    "Sarah keeps spamming your phone with memes.",
    "You just realized you forgot to eat lunch.",
    "A client just sent a stupid revision request.",
    "Your neighbor is playing loud music.",
    "You stepped on a lego (or something sharp).",
    "Javier is begging you to get online.",
    "You're running on 2 hours of sleep.",
    "You just got a notification for a bill you forgot about.",
];

/// Everything the composer interpolates into the system instruction, in
/// the order it appears there.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub environment: String,
    pub mood: String,
    pub facts: Vec<String>,
    pub gap_exceeded: bool,
    pub event: Option<String>,
    pub memories: Vec<String>,
}

impl PromptContext {
    /// Persona template + environment + mood + facts + gap note + event
    /// note + retrieved memories, as one instruction block.
    pub fn base_instruction(&self, character: &CharacterConfig) -> String {
        let mut instruction = String::new();
        instruction.push_str(&character.prompt_base);
        instruction.push('\n');
        instruction.push_str(&self.environment);
        instruction.push('\n');
        instruction.push_str(&format!("CURRENT MOOD: {}", self.mood));

        if !self.facts.is_empty() {
            instruction.push_str("\nKNOWN FACTS ABOUT USER:\n");
            for fact in &self.facts {
                instruction.push_str(&format!("- {}\n", fact));
            }
        }

        if self.gap_exceeded {
            instruction
                .push_str("\n[CONTEXT: You haven't spoken to the user in over 24 hours.]");
        }

        if let Some(event) = &self.event {
            instruction.push_str(&format!(
                "\n[EVENT HAPPENING NOW: {}. React to this naturally!]",
                event
            ));
        }

        if !self.memories.is_empty() {
            instruction.push_str("\nRELEVANT MEMORIES:\n");
            for memory in &self.memories {
                instruction.push_str(&format!("- {}\n", memory));
            }
        }

        instruction
    }

    /// Full instruction for a one-on-one chat, including texting-style
    /// directives and the mood-tag emission format.
    pub fn single_instruction(&self, character: &CharacterConfig, voice_enabled: bool) -> String {
        let voice_line = if voice_enabled {
            "- To send a voice message instead of text, put [VOICE] at the start of your reply."
        } else {
            "- DO NOT use [VOICE] tags."
        };

        format!(
            "{}\n\nINSTRUCTIONS:\n\
             - TEXTING STYLE: KEEP IT SHORT. Match the user's energy. If they send 5 words, you send 5-10 words. Do NOT write paragraphs.\n\
             - EMOJIS: Use emojis RARELY (max 1 every 5 messages). Do not use them in every sentence.\n\
             - React to the current time/status.\n\
             - If your status says you are 'Busy' or 'Sleeping', mention it.\n\
             {}\n\
             - CRITICAL: At the VERY END of your message, output your new emotional state in this format: [MOOD: Happy], [MOOD: Annoyed], [MOOD: Tired], etc. This will be hidden from the user but saved for the next conversation.",
            self.base_instruction(character),
            voice_line
        )
    }

    /// Abbreviated instruction for the primary persona in a group thread.
    /// Mood-tag emission is deliberately absent here.
    pub fn group_primary_instruction(&self, character: &CharacterConfig) -> String {
        format!(
            "{}\nCONTEXT: You are in a group chat with Sarah and the user. Sarah is about to speak too. Reply to the user briefly.",
            self.base_instruction(character)
        )
    }
}

/// Instruction for the second, hardcoded group persona, shown the primary
/// persona's completed reply.
pub fn group_partner_instruction(primary_name: &str, primary_reply: &str) -> String {
    format!(
        "Your name is Sarah. You are the user's chaotic best friend.\n\
         PERSONALITY: Loud, fun, uses emojis, bad slang, supports the user but roasts {primary}.\n\
         CONTEXT: Group chat with {primary} and User.\n\
         {primary} just said: \"{reply}\"\n\
         Reply to the conversation.",
        primary = primary_name,
        reply = primary_reply
    )
}

/// Low-probability flavor: pick one entry from the static event list.
pub fn pick_event<R: Rng>(rng: &mut R, probability: f64) -> Option<&'static str> {
    if rng.gen::<f64>() < probability {
        let idx = rng.gen_range(0..RANDOM_EVENTS.len());
        Some(RANDOM_EVENTS[idx])
    } else {
        None
    }
}

pub fn gap_exceeded(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last_seen > ChronoDuration::hours(ABSENCE_GAP_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characters::CharacterRegistry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn context() -> PromptContext {
        PromptContext {
            environment: "CURRENT TIME: Monday, 10:30 AM. WEATHER: Clear, 20°C. TRENDING: Nothing special. STATUS: Working on design projects (Stressed). (Busy)".to_string(),
            mood: "Chill".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn facts_block_is_omitted_when_empty() {
        let registry = CharacterRegistry::builtin();
        let instruction = context().base_instruction(registry.resolve("alex"));
        assert!(!instruction.contains("KNOWN FACTS ABOUT USER"));
    }

    #[test]
    fn facts_render_as_bullets() {
        let registry = CharacterRegistry::builtin();
        let mut ctx = context();
        ctx.facts = vec!["Has a dog named Rex".to_string()];
        let instruction = ctx.base_instruction(registry.resolve("alex"));
        assert!(instruction.contains("KNOWN FACTS ABOUT USER:\n- Has a dog named Rex"));
    }

    #[test]
    fn gap_note_appears_only_past_24_hours() {
        let registry = CharacterRegistry::builtin();
        let mut ctx = context();
        assert!(!ctx.base_instruction(registry.resolve("alex")).contains("over 24 hours"));
        ctx.gap_exceeded = true;
        assert!(ctx.base_instruction(registry.resolve("alex")).contains("over 24 hours"));
    }

    #[test]
    fn memories_render_when_present() {
        let registry = CharacterRegistry::builtin();
        let mut ctx = context();
        ctx.memories = vec!["User said: I got the job".to_string()];
        let instruction = ctx.base_instruction(registry.resolve("alex"));
        assert!(instruction.contains("RELEVANT MEMORIES:\n- User said: I got the job"));
    }

    #[test]
    fn single_instruction_forbids_voice_by_default() {
        let registry = CharacterRegistry::builtin();
        let instruction = context().single_instruction(registry.resolve("alex"), false);
        assert!(instruction.contains("DO NOT use [VOICE] tags"));
        assert!(instruction.contains("[MOOD: Happy]"));
    }

    #[test]
    fn single_instruction_allows_voice_when_enabled() {
        let registry = CharacterRegistry::builtin();
        let instruction = context().single_instruction(registry.resolve("alex"), true);
        assert!(!instruction.contains("DO NOT use [VOICE] tags"));
        assert!(instruction.contains("put [VOICE] at the start"));
    }

    #[test]
    fn group_instructions_skip_mood_tag_format() {
        let registry = CharacterRegistry::builtin();
        let instruction = context().group_primary_instruction(registry.resolve("alex"));
        assert!(!instruction.contains("[MOOD:"));
        assert!(instruction.contains("Sarah is about to speak too"));
    }

    #[test]
    fn group_partner_sees_the_first_reply() {
        let instruction = group_partner_instruction("Alex", "busy rn, talk later");
        assert!(instruction.contains("Alex just said: \"busy rn, talk later\""));
        assert!(instruction.contains("Your name is Sarah"));
    }

    #[test]
    fn pick_event_is_deterministic_under_a_fixed_seed() {
        let a = pick_event(&mut StdRng::seed_from_u64(9), 1.0);
        let b = pick_event(&mut StdRng::seed_from_u64(9), 1.0);
        assert_eq!(a, b);
        assert!(a.is_some());
        assert!(pick_event(&mut StdRng::seed_from_u64(9), 0.0).is_none());
    }

    #[test]
    fn gap_threshold_is_24_hours() {
        let now = Utc::now();
        assert!(!gap_exceeded(now - ChronoDuration::hours(23), now));
        assert!(gap_exceeded(now - ChronoDuration::hours(25), now));
    }
}
