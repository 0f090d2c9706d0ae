//! The model catalog: static model records plus derived lookup maps.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Budget fallback used when a model key is unknown or its option is absent.
///
/// The engine's context-budget arithmetic relies on this exact value, so it
/// must never drift from the catalog default.
pub const DEFAULT_MAX_ASSOCIATED_CONTENT_LENGTH: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    Chat,
}

/// Access tier required to use a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelAccess {
    Basic,
    Premium,
}

/// Per-model limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    pub max_associated_content_length: Option<usize>,
    pub long_conversation_warning_character_limit: Option<usize>,
}

/// A static catalog entry. Populated once at startup (fixed catalog or
/// server-provided list), read-only thereafter except for default-key
/// reassignment on the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Stable key the UI and conversation metadata reference.
    pub key: String,
    /// Backend wire name sent in requests.
    pub name: String,
    pub display_maker: String,
    pub category: ModelCategory,
    pub access: ModelAccess,
    pub supports_vision: bool,
    pub supports_tools: bool,
    pub options: ModelOptions,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct State {
    models: Vec<Model>,
    by_key: HashMap<String, usize>,
    name_to_key: HashMap<String, String>,
    key_to_name: HashMap<String, String>,
    default_key: String,
}

impl State {
    fn rebuild_maps(&mut self) {
        self.by_key.clear();
        self.name_to_key.clear();
        self.key_to_name.clear();
        for (index, model) in self.models.iter().enumerate() {
            self.by_key.insert(model.key.clone(), index);
            self.name_to_key.insert(model.name.clone(), model.key.clone());
            self.key_to_name.insert(model.key.clone(), model.name.clone());
        }
    }
}

/// Registry of available model definitions with key↔name lookup and
/// per-model context-length limits.
///
/// Shared by reference (`Arc<ModelStore>`) across conversation handlers and
/// engines; all getters return defensive copies.
pub struct ModelStore {
    state: RwLock<State>,
}

impl ModelStore {
    pub fn new(models: Vec<Model>, default_key: impl Into<String>) -> Self {
        let mut state = State {
            models,
            by_key: HashMap::new(),
            name_to_key: HashMap::new(),
            key_to_name: HashMap::new(),
            default_key: default_key.into(),
        };
        state.rebuild_maps();
        Self {
            state: RwLock::new(state),
        }
    }

    /// Replace the full model list, rebuilding all derived lookup maps.
    pub fn replace_models(&self, models: Vec<Model>) {
        let mut state = self.state.write();
        state.models = models;
        state.rebuild_maps();
    }

    pub fn models(&self) -> Vec<Model> {
        self.state.read().models.clone()
    }

    pub fn get(&self, key: &str) -> Option<Model> {
        let state = self.state.read();
        state.by_key.get(key).map(|&index| state.models[index].clone())
    }

    pub fn key_from_name(&self, name: &str) -> Option<String> {
        self.state.read().name_to_key.get(name).cloned()
    }

    pub fn name_from_key(&self, key: &str) -> Option<String> {
        self.state.read().key_to_name.get(key).cloned()
    }

    pub fn default_key(&self) -> String {
        self.state.read().default_key.clone()
    }

    /// Reassign the default model key. Unknown keys are rejected.
    pub fn set_default_key(&self, key: &str) -> bool {
        let mut state = self.state.write();
        if !state.by_key.contains_key(key) {
            tracing::debug!(key, "ignoring default reassignment to unknown model");
            return false;
        }
        state.default_key = key.to_string();
        true
    }

    /// The associated-content budget for a model, falling back to
    /// [`DEFAULT_MAX_ASSOCIATED_CONTENT_LENGTH`] when the key or its option
    /// is absent.
    pub fn max_associated_content_length(&self, key: Option<&str>) -> usize {
        let state = self.state.read();
        key.and_then(|k| state.by_key.get(k))
            .and_then(|&index| state.models[index].options.max_associated_content_length)
            .unwrap_or(DEFAULT_MAX_ASSOCIATED_CONTENT_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(key: &str, name: &str, budget: Option<usize>) -> Model {
        Model {
            key: key.into(),
            name: name.into(),
            display_maker: "test".into(),
            category: ModelCategory::Chat,
            access: ModelAccess::Basic,
            supports_vision: false,
            supports_tools: true,
            options: ModelOptions {
                max_associated_content_length: budget,
                long_conversation_warning_character_limit: None,
            },
        }
    }

    #[test]
    fn lookup_maps_resolve_both_directions() {
        let store = ModelStore::new(
            vec![model("alpha", "alpha-wire", Some(100)), model("beta", "beta-wire", None)],
            "alpha",
        );
        assert_eq!(store.key_from_name("beta-wire").as_deref(), Some("beta"));
        assert_eq!(store.name_from_key("alpha").as_deref(), Some("alpha-wire"));
        assert_eq!(store.key_from_name("missing"), None);
    }

    #[test]
    fn budget_falls_back_to_default() {
        let store = ModelStore::new(vec![model("alpha", "alpha-wire", Some(100))], "alpha");
        assert_eq!(store.max_associated_content_length(Some("alpha")), 100);
        assert_eq!(
            store.max_associated_content_length(Some("unknown")),
            DEFAULT_MAX_ASSOCIATED_CONTENT_LENGTH
        );
        assert_eq!(
            store.max_associated_content_length(None),
            DEFAULT_MAX_ASSOCIATED_CONTENT_LENGTH
        );

        let store = ModelStore::new(vec![model("alpha", "alpha-wire", None)], "alpha");
        assert_eq!(
            store.max_associated_content_length(Some("alpha")),
            DEFAULT_MAX_ASSOCIATED_CONTENT_LENGTH
        );
    }

    #[test]
    fn replace_models_rebuilds_maps() {
        let store = ModelStore::new(vec![model("alpha", "alpha-wire", None)], "alpha");
        store.replace_models(vec![model("gamma", "gamma-wire", None)]);
        assert_eq!(store.name_from_key("alpha"), None);
        assert_eq!(store.key_from_name("gamma-wire").as_deref(), Some("gamma"));
    }

    #[test]
    fn default_key_reassignment_requires_known_key() {
        let store = ModelStore::new(
            vec![model("alpha", "alpha-wire", None), model("beta", "beta-wire", None)],
            "alpha",
        );
        assert!(!store.set_default_key("missing"));
        assert_eq!(store.default_key(), "alpha");
        assert!(store.set_default_key("beta"));
        assert_eq!(store.default_key(), "beta");
    }
}
