use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::{
    EngineOptions, Language, LoadError, MarianTranslator, TranslateError, Translator,
    UnsupportedLanguage,
};
use crate::config_manager::ModelsConfig;

/// Immutable map from target language to its loaded model. Built once at
/// startup and shared through application state.
pub struct LanguageRegistry {
    translators: HashMap<Language, Arc<dyn Translator>>,
}

impl LanguageRegistry {
    pub fn new(translators: HashMap<Language, Arc<dyn Translator>>) -> Self {
        Self { translators }
    }

    /// Load a Marian model for every supported language. Fails on the first
    /// language whose assets are missing or unreadable.
    pub fn load(models: &ModelsConfig, extract_path: &Path) -> Result<Self, (Language, LoadError)> {
        let options = EngineOptions {
            max_sequence_length: models.max_sequence_length,
            intra_threads: models.intra_threads,
        };

        let mut translators: HashMap<Language, Arc<dyn Translator>> = HashMap::new();
        for language in Language::ALL {
            let dir = models.model_dir(extract_path, language);
            let translator =
                MarianTranslator::load(language, &dir, options).map_err(|err| (language, err))?;
            translators.insert(language, Arc::new(translator));
        }

        info!("Loaded {} translation models", translators.len());
        Ok(Self::new(translators))
    }

    /// Look up a model by wire code (`"fr"`, `"jap"`, ...).
    pub fn get(&self, code: &str) -> Result<Arc<dyn Translator>, UnsupportedLanguage> {
        code.parse::<Language>()
            .ok()
            .and_then(|language| self.translators.get(&language))
            .cloned()
            .ok_or_else(|| UnsupportedLanguage(code.to_string()))
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.translators.keys().copied().collect();
        languages.sort();
        languages
    }

    pub fn len(&self) -> usize {
        self.translators.len()
    }
}

/// Run `text` through `translator` and keep the first candidate.
pub async fn translate_first(translator: &dyn Translator, text: &str) -> Result<String, TranslateError> {
    let candidates = translator.translate(text).await?;
    candidates
        .into_iter()
        .next()
        .filter(|candidate| !candidate.trim().is_empty())
        .ok_or(TranslateError::EmptyOutput)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed(Vec<&'static str>);

    #[async_trait]
    impl Translator for Fixed {
        async fn translate(&self, _text: &str) -> Result<Vec<String>, TranslateError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    fn registry() -> LanguageRegistry {
        let mut map: HashMap<Language, Arc<dyn Translator>> = HashMap::new();
        map.insert(Language::French, Arc::new(Fixed(vec!["bonjour"])));
        map.insert(Language::Japanese, Arc::new(Fixed(vec!["こんにちは"])));
        LanguageRegistry::new(map)
    }

    #[test]
    fn looks_up_by_wire_code() {
        let registry = registry();
        assert!(registry.get("fr").is_ok());
        assert!(registry.get("jap").is_ok());
        assert_eq!(registry.languages(), vec![Language::French, Language::Japanese]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn known_code_without_model_is_unsupported() {
        let err = registry().get("de").err().expect("German is not registered");
        assert_eq!(err.to_string(), "Language 'de' not supported");
        assert!(registry().get("xx").is_err());
    }

    #[tokio::test]
    async fn keeps_first_candidate() {
        let out = translate_first(&Fixed(vec!["premier", "second"]), "hi").await.unwrap();
        assert_eq!(out, "premier");
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let err = translate_first(&Fixed(vec![]), "hi").await.unwrap_err();
        assert!(matches!(err, TranslateError::EmptyOutput));

        let err = translate_first(&Fixed(vec!["  "]), "hi").await.unwrap_err();
        assert!(matches!(err, TranslateError::EmptyOutput));
    }

    #[test]
    fn load_names_the_failing_language() {
        let dir = tempfile::tempdir().unwrap();
        let (language, err) = LanguageRegistry::load(&ModelsConfig::default(), dir.path())
            .err()
            .expect("no assets on disk");
        assert_eq!(language, Language::Hindi);
        assert!(matches!(err, LoadError::MissingFile(_)));
    }
}
