pub mod generation;
pub mod interface;
pub mod language;
pub mod marian;
pub mod registry;

pub use interface::{LoadError, TranslateError, Translator};
pub use language::{Language, UnsupportedLanguage};
pub use marian::{EngineOptions, MarianTranslator};
pub use registry::{translate_first, LanguageRegistry};
