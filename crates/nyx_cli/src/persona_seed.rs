//! Startup persona loading (§4.11 addition): the core persona text and the
//! structured extended-persona / speech-style tables are authored offline
//! as a single JSON file and indexed into [`PersonaRetriever`] on boot.
//! Grounded on the `SeedPersona::load(persona_dir)` step in
//! `mneme_cli::main`, collapsed from a directory of files to one JSON
//! document since this engine has no narrative-chapter structure to seed.

use anyhow::{Context, Result};
use nyx_memory::{PersonaConfig, PersonaRetriever, SpeechStyle};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct SeedPersona {
    pub core_persona: String,
    #[serde(default)]
    pub extended: PersonaConfig,
    #[serde(default)]
    pub styles: Vec<SpeechStyle>,
}

impl Default for SeedPersona {
    fn default() -> Self {
        Self {
            core_persona: "You are a warm, observant conversational companion. Speak naturally, \
                           stay concise, and let your mood and relationship with the user color \
                           your tone."
                .to_string(),
            extended: PersonaConfig::default(),
            styles: Vec::new(),
        }
    }
}

impl SeedPersona {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read persona file {}", path.as_ref().display()))?;
        serde_json::from_str(&text).with_context(|| format!("failed to parse persona file {}", path.as_ref().display()))
    }

    pub fn load_or_default(path: Option<impl AsRef<Path>>) -> Self {
        match path {
            Some(p) => match Self::load(&p) {
                Ok(seed) => seed,
                Err(e) => {
                    tracing::warn!(error = %e, "persona file not found or invalid, using built-in default persona");
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }

    pub async fn index_into(&self, retriever: &PersonaRetriever) -> Result<()> {
        retriever.index_extended_persona(&self.extended).await?;
        retriever.index_speech_styles(self.styles.clone()).await?;
        Ok(())
    }
}
