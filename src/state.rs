use std::sync::Arc;

use crate::translate::LanguageRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<LanguageRegistry>,
    pub max_input_chars: usize,
}

impl AppState {
    pub fn new(registry: LanguageRegistry, max_input_chars: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            max_input_chars,
        }
    }
}
