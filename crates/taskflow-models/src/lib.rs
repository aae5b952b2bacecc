//! Model alias resolution for the Agent Registry's `resolveModel` step.
//!
//! Grounded on `restflow-core::models::ai_model::AIModel`'s canonical-id
//! format (`provider:model`, lowercase) and its `from_canonical_id`/
//! `as_str` pattern, trimmed from that crate's full ~50-model catalog down
//! to the three named aliases plus `inherit` the Agent Registry's model
//! resolution actually needs.

use serde::{Deserialize, Serialize};

/// A model reference as it appears on an agent definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelAlias {
    /// Use the surrounding loop config's model unchanged.
    Inherit,
    Sonnet,
    Opus,
    Haiku,
    /// Anything unrecognized; resolves to the surrounding model.
    Custom(String),
}

impl ModelAlias {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "inherit" => Self::Inherit,
            "sonnet" => Self::Sonnet,
            "opus" => Self::Opus,
            "haiku" => Self::Haiku,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Canonical model id for a named alias, in `provider:model` form —
/// the same format `AIModel::canonical_id` produces.
fn canonical_for_alias(alias: &ModelAlias) -> Option<&'static str> {
    match alias {
        ModelAlias::Sonnet => Some("anthropic:claude-3-5-sonnet-20241022"),
        ModelAlias::Opus => Some("anthropic:claude-3-opus-20240229"),
        ModelAlias::Haiku => Some("anthropic:claude-3-5-haiku-20241022"),
        ModelAlias::Inherit | ModelAlias::Custom(_) => None,
    }
}

/// Resolve an agent's declared model against the surrounding loop config's
/// model: `inherit` takes the surrounding model; a named
/// alias maps to its canonical id; anything else falls back to the
/// surrounding model.
pub fn resolve_model(agent_model: &str, surrounding_model: &str) -> String {
    let alias = ModelAlias::parse(agent_model);
    canonical_for_alias(&alias)
        .map(str::to_string)
        .unwrap_or_else(|| surrounding_model.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inherit_takes_surrounding_model() {
        assert_eq!(
            resolve_model("inherit", "anthropic:claude-3-opus-20240229"),
            "anthropic:claude-3-opus-20240229"
        );
    }

    #[test]
    fn named_aliases_resolve_to_canonical_ids() {
        assert_eq!(resolve_model("sonnet", "x"), "anthropic:claude-3-5-sonnet-20241022");
        assert_eq!(resolve_model("opus", "x"), "anthropic:claude-3-opus-20240229");
        assert_eq!(resolve_model("haiku", "x"), "anthropic:claude-3-5-haiku-20241022");
    }

    #[test]
    fn unrecognized_model_falls_back_to_surrounding() {
        assert_eq!(
            resolve_model("openai:gpt-5", "anthropic:claude-3-5-sonnet-20241022"),
            "anthropic:claude-3-5-sonnet-20241022"
        );
        assert_eq!(resolve_model("typo", "x"), "x");
    }
}
