use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Target languages served by the backend. Source text is always English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Language {
    Hindi,
    Polish,
    French,
    Chinese,
    German,
    Japanese,
    Arabic,
    Tagalog,
    Urdu,
}

impl Language {
    pub const ALL: [Language; 9] = [
        Language::Hindi,
        Language::Polish,
        Language::French,
        Language::Chinese,
        Language::German,
        Language::Japanese,
        Language::Arabic,
        Language::Tagalog,
        Language::Urdu,
    ];

    /// Wire code used by the HTTP API and the config file.
    pub fn code(self) -> &'static str {
        match self {
            Language::Hindi => "hi",
            Language::Polish => "pl",
            Language::French => "fr",
            Language::Chinese => "zh",
            Language::German => "de",
            Language::Japanese => "jap",
            Language::Arabic => "ar",
            Language::Tagalog => "tl",
            Language::Urdu => "ur",
        }
    }

    /// Directory name of the fine-tuned model inside the weights bundle.
    pub fn default_model_dir(self) -> &'static str {
        match self {
            Language::Hindi => "FineTuneHelsinkiTransformer_en_hi",
            Language::Polish => "FineTunedHelsinkiTransformer_en_pol",
            Language::French => "FineTunedHelsinkiTransformer_en_Fr",
            Language::Chinese => "FineTunedHelsinkiTransformer_en_zh",
            Language::German => "FineTunedHelsinkiTransformer_en_de",
            Language::Japanese => "FineTuneHelsinkiTransformer_en_jap",
            Language::Arabic => "FineTuneHelsinkiTransformer_en_ar",
            Language::Tagalog => "FineTuneHelsinkiTransformer_en_tl",
            Language::Urdu => "FineTunedHelsinkiTransformer_en_ur",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Language '{0}' not supported")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.code() == code)
            .ok_or_else(|| UnsupportedLanguage(code.to_string()))
    }
}

impl TryFrom<String> for Language {
    type Error = UnsupportedLanguage;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        code.parse()
    }
}

impl From<Language> for String {
    fn from(lang: Language) -> Self {
        lang.code().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_parse() {
        for lang in Language::ALL {
            assert_eq!(lang.code().parse::<Language>(), Ok(lang));
        }
    }

    #[test]
    fn japanese_uses_three_letter_code() {
        assert_eq!("jap".parse::<Language>(), Ok(Language::Japanese));
        assert!("ja".parse::<Language>().is_err());
    }

    #[test]
    fn parsing_is_case_sensitive() {
        let err = "FR".parse::<Language>().unwrap_err();
        assert_eq!(err.to_string(), "Language 'FR' not supported");
    }
}
