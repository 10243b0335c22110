//! Priority-ordered list of backend models.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    /// Whether the model accepts a binary part next to the prompt.
    #[serde(default = "default_multimodal")]
    pub multimodal: bool,
    /// Lower is tried first.
    #[serde(default)]
    pub priority: u32,
}

fn default_multimodal() -> bool {
    true
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, multimodal: bool, priority: u32) -> Self {
        Self {
            id: id.into(),
            multimodal,
            priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("model chain is empty")]
    Empty,
    #[error("model '{0}' appears more than once in the chain")]
    Duplicate(String),
    #[error("model id must not be blank")]
    BlankId,
}

/// Fallback order for one kind of request. Never empty.
#[derive(Debug, Clone)]
pub struct ModelChain {
    models: Vec<ModelDescriptor>,
}

impl ModelChain {
    pub fn new(mut models: Vec<ModelDescriptor>) -> Result<Self, ChainError> {
        if models.is_empty() {
            return Err(ChainError::Empty);
        }
        for (i, model) in models.iter().enumerate() {
            if model.id.trim().is_empty() {
                return Err(ChainError::BlankId);
            }
            if models[..i].iter().any(|m| m.id == model.id) {
                return Err(ChainError::Duplicate(model.id.clone()));
            }
        }
        // Stable: equal priorities keep their configured order
        models.sort_by_key(|m| m.priority);
        Ok(Self { models })
    }

    pub fn primary(&self) -> &ModelDescriptor {
        &self.models[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_by_priority() {
        let chain = ModelChain::new(vec![
            ModelDescriptor::new("c", true, 2),
            ModelDescriptor::new("a", true, 0),
            ModelDescriptor::new("b", false, 1),
        ])
        .unwrap();
        assert_eq!(chain.ids(), vec!["a", "b", "c"]);
        assert_eq!(chain.primary().id, "a");
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_ties_keep_config_order() {
        let chain = ModelChain::new(vec![
            ModelDescriptor::new("first", true, 0),
            ModelDescriptor::new("second", true, 0),
        ])
        .unwrap();
        assert_eq!(chain.ids(), vec!["first", "second"]);
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert_eq!(ModelChain::new(vec![]).unwrap_err(), ChainError::Empty);
        assert_eq!(
            ModelChain::new(vec![
                ModelDescriptor::new("a", true, 0),
                ModelDescriptor::new("a", true, 1),
            ])
            .unwrap_err(),
            ChainError::Duplicate("a".to_string())
        );
        assert_eq!(
            ModelChain::new(vec![ModelDescriptor::new(" ", true, 0)]).unwrap_err(),
            ChainError::BlankId
        );
    }

    #[test]
    fn test_descriptor_defaults_from_json() {
        let d: ModelDescriptor = serde_json::from_str(r#"{"id": "gemini-1.5-flash"}"#).unwrap();
        assert!(d.multimodal);
        assert_eq!(d.priority, 0);
    }
}
