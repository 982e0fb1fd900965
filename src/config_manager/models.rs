use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::translate::Language;

/// Longest accepted request text, in characters.
pub const MAX_INPUT_CHARS: usize = 512;

/// Settings for loading the per-language translation models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Directory holding one model folder per language. Relative paths are
    /// resolved against `assets.extract_path`.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Tokenizer truncation length and upper bound on generated tokens.
    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,

    /// ONNX runtime intra-op threads per session. Runtime default when unset.
    #[serde(default)]
    pub intra_threads: Option<usize>,

    /// Per-language overrides of the model folder name.
    #[serde(default)]
    pub languages: BTreeMap<Language, String>,
}

fn default_root() -> PathBuf {
    PathBuf::from("Fine_Tune_Weight")
}

fn default_max_input_chars() -> usize {
    MAX_INPUT_CHARS
}

fn default_max_sequence_length() -> usize {
    512
}

impl ModelsConfig {
    pub fn models_root(&self, extract_path: &Path) -> PathBuf {
        if self.root.is_absolute() {
            self.root.clone()
        } else {
            extract_path.join(&self.root)
        }
    }

    pub fn model_dir(&self, extract_path: &Path, language: Language) -> PathBuf {
        let folder = self
            .languages
            .get(&language)
            .map(String::as_str)
            .unwrap_or_else(|| language.default_model_dir());
        self.models_root(extract_path).join(folder)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_input_chars == 0 || self.max_input_chars > MAX_INPUT_CHARS {
            return Err(ConfigError::Invalid(format!(
                "models.max_input_chars must be between 1 and {MAX_INPUT_CHARS}"
            )));
        }
        if self.max_sequence_length == 0 {
            return Err(ConfigError::Invalid("models.max_sequence_length must be positive".to_string()));
        }
        if self.intra_threads == Some(0) {
            return Err(ConfigError::Invalid("models.intra_threads must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            max_input_chars: default_max_input_chars(),
            max_sequence_length: default_max_sequence_length(),
            intra_threads: None,
            languages: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_matches_weights_bundle() {
        let models = ModelsConfig::default();
        let dir = models.model_dir(Path::new("./Weight"), Language::French);
        assert_eq!(
            dir,
            PathBuf::from("./Weight/Fine_Tune_Weight/FineTunedHelsinkiTransformer_en_Fr")
        );
    }

    #[test]
    fn override_and_absolute_root() {
        let mut models = ModelsConfig {
            root: PathBuf::from("/srv/models"),
            ..ModelsConfig::default()
        };
        models.languages.insert(Language::German, "opus-mt-en-de".to_string());

        assert_eq!(
            models.model_dir(Path::new("./Weight"), Language::German),
            PathBuf::from("/srv/models/opus-mt-en-de")
        );
        assert_eq!(
            models.model_dir(Path::new("./Weight"), Language::Urdu),
            PathBuf::from("/srv/models/FineTunedHelsinkiTransformer_en_ur")
        );
    }

    #[test]
    fn input_limit_cannot_exceed_default() {
        let too_long = ModelsConfig {
            max_input_chars: MAX_INPUT_CHARS + 1,
            ..ModelsConfig::default()
        };
        assert!(matches!(too_long.validate(), Err(ConfigError::Invalid(_))));

        let stricter = ModelsConfig {
            max_input_chars: 128,
            ..ModelsConfig::default()
        };
        assert!(stricter.validate().is_ok());
        assert!(ModelsConfig::default().validate().is_ok());
    }
}
