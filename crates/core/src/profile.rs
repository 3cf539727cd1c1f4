//! Setup profiles and the catalog that selects one per session.
//!
//! A profile is everything the upstream needs to know before the first frame
//! of media: which model to run, how it should respond, and the instruction
//! text that shapes its behaviour. The catalog is built once at startup and
//! shared read-only by every session.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::{info, warn};

/// Model used by the shipped profiles.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-latest";
/// Prebuilt voice used by the shipped profiles.
pub const DEFAULT_VOICE: &str = "Puck";
/// Hidden first turn that gets the model talking without waiting for the user.
pub const DEFAULT_KICKOFF: &str = "Hello RobAI, please start the session.";

const GENERAL_INSTRUCTION: &str = include_str!("../prompts/general.md");
const EXERCISE_INSTRUCTION: &str = include_str!("../prompts/exercise.md");

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("default mode '{0}' has no profile")]
    MissingDefault(String),
    #[error("failed to read instruction overrides from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

impl SpeechConfig {
    pub fn prebuilt(voice_name: impl Into<String>) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.into(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

impl GenerationConfig {
    /// Spoken responses with the given prebuilt voice.
    pub fn audio(voice_name: impl Into<String>) -> Self {
        Self {
            response_modalities: vec![ResponseModality::Audio],
            speech_config: Some(SpeechConfig::prebuilt(voice_name)),
        }
    }
}

/// Immutable setup parameters for one upstream session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub instruction: String,
    /// Optional user turn sent right after the session becomes active.
    #[serde(default)]
    pub kickoff: Option<String>,
}

impl Profile {
    pub fn new(
        model: impl Into<String>,
        generation_config: GenerationConfig,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            generation_config,
            instruction: instruction.into(),
            kickoff: None,
        }
    }

    pub fn with_kickoff(mut self, kickoff: impl Into<String>) -> Self {
        self.kickoff = Some(kickoff.into());
        self
    }
}

/// Maps mode names to profiles, with one designated default.
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    entries: Vec<(String, Profile)>,
    default_index: usize,
}

impl ProfileCatalog {
    /// Builds a catalog. Later entries replace earlier ones with the same mode.
    pub fn new(
        default_mode: &str,
        profiles: impl IntoIterator<Item = (String, Profile)>,
    ) -> Result<Self, CatalogError> {
        let mut entries: Vec<(String, Profile)> = Vec::new();
        for (mode, profile) in profiles {
            match entries.iter_mut().find(|(existing, _)| *existing == mode) {
                Some(entry) => entry.1 = profile,
                None => entries.push((mode, profile)),
            }
        }
        let default_index = entries
            .iter()
            .position(|(mode, _)| mode == default_mode)
            .ok_or_else(|| CatalogError::MissingDefault(default_mode.to_string()))?;
        Ok(Self {
            entries,
            default_index,
        })
    }

    /// The shipped catalog: `general` (default) and `exercise`.
    pub fn builtin() -> Self {
        let profile = |instruction: &str| {
            Profile::new(
                DEFAULT_MODEL,
                GenerationConfig::audio(DEFAULT_VOICE),
                instruction.trim(),
            )
            .with_kickoff(DEFAULT_KICKOFF)
        };
        Self {
            entries: vec![
                ("general".to_string(), profile(GENERAL_INSTRUCTION)),
                ("exercise".to_string(), profile(EXERCISE_INSTRUCTION)),
            ],
            default_index: 0,
        }
    }

    /// Returns the profile for `mode`, or the default profile when the mode is
    /// missing or unknown.
    pub fn resolve(&self, mode: Option<&str>) -> &Profile {
        self.resolve_entry(mode).1
    }

    /// Like [`resolve`](Self::resolve), also returning the mode that was
    /// actually selected.
    pub fn resolve_entry(&self, mode: Option<&str>) -> (&str, &Profile) {
        let (name, profile) = mode
            .and_then(|m| self.entries.iter().find(|(name, _)| name == m))
            .unwrap_or(&self.entries[self.default_index]);
        (name.as_str(), profile)
    }

    pub fn default_mode(&self) -> &str {
        &self.entries[self.default_index].0
    }

    pub fn modes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(mode, _)| mode.as_str())
    }

    pub fn with_default_mode(mut self, mode: &str) -> Result<Self, CatalogError> {
        self.default_index = self
            .entries
            .iter()
            .position(|(name, _)| name == mode)
            .ok_or_else(|| CatalogError::MissingDefault(mode.to_string()))?;
        Ok(self)
    }

    /// Replaces instruction text from `<dir>/<mode>.md` files.
    ///
    /// Files whose stem is not a known mode are skipped with a warning.
    pub fn with_instruction_overrides(mut self, dir: &Path) -> Result<Self, CatalogError> {
        let io_err = |source| CatalogError::Io {
            path: dir.display().to_string(),
            source,
        };
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("md") {
                continue;
            }
            let Some(mode) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some((_, profile)) = self.entries.iter_mut().find(|(name, _)| name == mode) else {
                warn!(path = %path.display(), "Ignoring instruction file for unknown mode");
                continue;
            };
            let text = fs::read_to_string(&path).map_err(io_err)?;
            profile.instruction = text.trim().to_string();
            info!(mode, "Loaded instruction override");
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(model: &str) -> Profile {
        Profile::new(model, GenerationConfig::audio("Puck"), "be helpful")
    }

    #[test]
    fn resolve_returns_mapped_profile_for_every_mode() {
        let catalog = ProfileCatalog::builtin();
        for mode in catalog.modes().map(str::to_string).collect::<Vec<_>>() {
            let (resolved_mode, resolved) = catalog.resolve_entry(Some(&mode));
            assert_eq!(resolved_mode, mode);
            assert!(std::ptr::eq(resolved, catalog.resolve(Some(&mode))));
        }
        assert!(catalog.resolve(Some("exercise")).instruction.contains("Ring Stack"));
    }

    #[test]
    fn unknown_or_missing_mode_falls_back_to_default() {
        let catalog = ProfileCatalog::builtin();
        let default = catalog.resolve(Some("general"));
        assert_eq!(catalog.resolve(None), default);
        assert_eq!(catalog.resolve(Some("does-not-exist")), default);
        assert_eq!(catalog.resolve(Some("")), default);
        assert_eq!(catalog.resolve_entry(Some("EXERCISE")).0, "general");
    }

    #[test]
    fn builtin_profiles_speak_with_a_kickoff() {
        let catalog = ProfileCatalog::builtin();
        assert_eq!(catalog.default_mode(), "general");
        for mode in ["general", "exercise"] {
            let profile = catalog.resolve(Some(mode));
            assert_eq!(profile.model, DEFAULT_MODEL);
            assert_eq!(
                profile.generation_config.response_modalities,
                vec![ResponseModality::Audio]
            );
            assert_eq!(profile.kickoff.as_deref(), Some(DEFAULT_KICKOFF));
            assert!(!profile.instruction.is_empty());
        }
    }

    #[test]
    fn new_requires_the_default_mode() {
        let err = ProfileCatalog::new("missing", [("a".to_string(), profile("m1"))]).unwrap_err();
        assert!(matches!(err, CatalogError::MissingDefault(mode) if mode == "missing"));
    }

    #[test]
    fn new_keeps_last_duplicate() {
        let catalog = ProfileCatalog::new(
            "a",
            [
                ("a".to_string(), profile("first")),
                ("a".to_string(), profile("second")),
            ],
        )
        .unwrap();
        assert_eq!(catalog.resolve(Some("a")).model, "second");
        assert_eq!(catalog.modes().count(), 1);
    }

    #[test]
    fn default_mode_can_be_reconfigured() {
        let catalog = ProfileCatalog::builtin().with_default_mode("exercise").unwrap();
        assert_eq!(catalog.default_mode(), "exercise");
        assert!(catalog.resolve(Some("nope")).instruction.contains("Ring Stack"));
        assert!(ProfileCatalog::builtin().with_default_mode("nope").is_err());
    }

    #[test]
    fn instruction_overrides_replace_known_modes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("exercise.md"), "  Stack the cups.\n").unwrap();
        fs::write(dir.path().join("unknown.md"), "ignored").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = ProfileCatalog::builtin()
            .with_instruction_overrides(dir.path())
            .unwrap();

        assert_eq!(catalog.resolve(Some("exercise")).instruction, "Stack the cups.");
        assert!(catalog.resolve(Some("general")).instruction.contains("workshop"));
        assert_eq!(catalog.modes().count(), 2);
    }

    #[test]
    fn instruction_overrides_missing_dir_is_an_error() {
        let err = ProfileCatalog::builtin()
            .with_instruction_overrides(Path::new("/definitely/not/here"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }
}
