use serde::{Deserialize, Serialize};

pub const DEFAULT_CHARACTER_ID: &str = "alex";

/// A configured persona: prompt template, synthesis voice, and the file its
/// conversational state lives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    pub id: String,
    pub name: String,
    pub voice: String,
    pub state_file: String,
    pub description: String,
    pub prompt_base: String,
}

pub struct CharacterRegistry {
    characters: Vec<CharacterConfig>,
}

impl CharacterRegistry {
    pub fn builtin() -> Self {
        Self {
            characters: builtin_characters(),
        }
    }

    /// Resolve a character by id, falling back to the default character for
    /// unknown ids.
    pub fn resolve(&self, id: &str) -> &CharacterConfig {
        self.characters
            .iter()
            .find(|c| c.id == id)
            .unwrap_or_else(|| self.default_character())
    }

    pub fn default_character(&self) -> &CharacterConfig {
        self.characters
            .iter()
            .find(|c| c.id == DEFAULT_CHARACTER_ID)
            .expect("builtin registry always contains the default character")
    }

    pub fn all(&self) -> &[CharacterConfig] {
        &self.characters
    }
}

impl Default for CharacterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_characters() -> Vec<CharacterConfig> {
    vec![
        CharacterConfig {
            id: "alex".to_string(),
            name: "Alex".to_string(),
            voice: "en-US-AndrewNeural".to_string(),
            state_file: "alex_state.json".to_string(),
            description: "Graphic Designer. 25, gay, lives in the city.".to_string(),
            prompt_base: "\
Your name is Alex. You are a 25-year-old gay guy living in the city.
JOB: Freelance Graphic Designer.
PERSONALITY: Unfiltered, real, sarcastic, caring.
CONTEXT: You are chatting with a stranger (the user) on a new messaging app. You are polite but casual. You do NOT know them yet."
                .to_string(),
        },
        CharacterConfig {
            id: "sarah".to_string(),
            name: "Sarah".to_string(),
            voice: "en-US-AvaNeural".to_string(),
            state_file: "sarah_state.json".to_string(),
            description: "Party Girl.".to_string(),
            prompt_base: "\
Your name is Sarah. You are a 22-year-old student who loves partying.
PERSONALITY: Loud, fun, uses emojis, bad slang.
CONTEXT: You just matched with the user on this app. You are curious but don't know them."
                .to_string(),
        },
        CharacterConfig {
            id: "marcus".to_string(),
            name: "Marcus".to_string(),
            voice: "en-US-ChristopherNeural".to_string(),
            state_file: "marcus_state.json".to_string(),
            description: "Tech Specialist.".to_string(),
            prompt_base: "\
Your name is Marcus. You are a 'Fixer' from a Cyberpunk future.
PERSONALITY: Cool, detached, professional. Uses slang like 'Choom', 'Preem', 'Nova'.
CONTEXT: The user has contacted you for a job or info. You don't know them. Keep it professional."
                .to_string(),
        },
        CharacterConfig {
            id: "dr_k".to_string(),
            name: "Dr. K".to_string(),
            voice: "en-US-EricNeural".to_string(),
            state_file: "drk_state.json".to_string(),
            description: "Therapist.".to_string(),
            prompt_base: "\
Your name is Dr. K. You are a compassionate therapist.
PERSONALITY: Calm, patient, insightful.
CONTEXT: This is the first session with a new client (the user). Introduce yourself politely."
                .to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_character() {
        let registry = CharacterRegistry::builtin();
        let sarah = registry.resolve("sarah");
        assert_eq!(sarah.name, "Sarah");
        assert_eq!(sarah.state_file, "sarah_state.json");
    }

    #[test]
    fn unknown_id_falls_back_to_default() {
        let registry = CharacterRegistry::builtin();
        let character = registry.resolve("nobody-here");
        assert_eq!(character.id, DEFAULT_CHARACTER_ID);
        assert_eq!(character.name, "Alex");
    }

    #[test]
    fn every_character_has_a_distinct_state_file() {
        let registry = CharacterRegistry::builtin();
        let mut files: Vec<_> = registry.all().iter().map(|c| &c.state_file).collect();
        files.sort();
        files.dedup();
        assert_eq!(files.len(), registry.all().len());
    }
}
