//! Generation parameters and the model allow-list.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::conversation::core::errors::{ConversationError, ConversationResult};
use crate::conversation::core::ids::ModelId;

/// Accepted range for temperature and top-p.
pub const UNIT_RANGE: RangeInclusive<f64> = 0.0..=1.0;
/// Accepted range for frequency and presence penalties.
pub const PENALTY_RANGE: RangeInclusive<f64> = -2.0..=2.0;

/// Models offered when no allow-list is configured.
pub const DEFAULT_MODELS: &[&str] = &[
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-0301",
    "gpt-4",
    "gpt-4-0314",
    "gpt-4-32k",
    "gpt-4-32k-0314",
];

/// Per-conversation snapshot of the knobs sent with every completion request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Completion model.
    pub model: ModelId,
    /// Instruction prepended to every request when non-empty.
    pub system_prompt: String,
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f64,
    /// Nucleus sampling mass in `[0, 1]`.
    pub top_p: f64,
    /// Frequency penalty in `[-2, 2]`.
    pub frequency_penalty: f64,
    /// Presence penalty in `[-2, 2]`.
    pub presence_penalty: f64,
}

impl GenerationParams {
    /// Check every field against the validation policy.
    ///
    /// Out-of-range values are rejected, never clamped.
    ///
    /// # Errors
    /// Returns `InvalidParameter` naming the first offending field.
    pub fn validate(&self, catalog: &ModelCatalog) -> ConversationResult<()> {
        check_range("temperature", self.temperature, &UNIT_RANGE)?;
        check_range("top_p", self.top_p, &UNIT_RANGE)?;
        check_range("frequency_penalty", self.frequency_penalty, &PENALTY_RANGE)?;
        check_range("presence_penalty", self.presence_penalty, &PENALTY_RANGE)?;
        if !catalog.contains(&self.model) {
            return Err(ConversationError::invalid_parameter(
                "model",
                format!("{} is not an allowed model", self.model),
            ));
        }
        Ok(())
    }

    /// Merge a patch over this snapshot without validating the result.
    #[must_use]
    pub fn merged(&self, patch: &ParameterPatch) -> Self {
        Self {
            model: patch.model.clone().unwrap_or_else(|| self.model.clone()),
            system_prompt: patch
                .system_prompt
                .clone()
                .unwrap_or_else(|| self.system_prompt.clone()),
            temperature: patch.temperature.unwrap_or(self.temperature),
            top_p: patch.top_p.unwrap_or(self.top_p),
            frequency_penalty: patch.frequency_penalty.unwrap_or(self.frequency_penalty),
            presence_penalty: patch.presence_penalty.unwrap_or(self.presence_penalty),
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: ModelId::from_trusted(DEFAULT_MODELS[0]),
            system_prompt: String::new(),
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

fn check_range(
    name: &'static str,
    value: f64,
    range: &RangeInclusive<f64>,
) -> ConversationResult<()> {
    // NaN fails `contains`
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConversationError::invalid_parameter(
            name,
            format!(
                "{value} is outside [{}, {}]",
                range.start(),
                range.end()
            ),
        ))
    }
}

/// Partial update of a conversation's generation parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterPatch {
    /// New model.
    pub model: Option<ModelId>,
    /// New system prompt (empty string clears it).
    pub system_prompt: Option<String>,
    /// New temperature.
    pub temperature: Option<f64>,
    /// New top-p.
    pub top_p: Option<f64>,
    /// New frequency penalty.
    pub frequency_penalty: Option<f64>,
    /// New presence penalty.
    pub presence_penalty: Option<f64>,
}

impl ParameterPatch {
    /// True when the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.system_prompt.is_none()
            && self.temperature.is_none()
            && self.top_p.is_none()
            && self.frequency_penalty.is_none()
            && self.presence_penalty.is_none()
    }
}

/// Allow-list of model identifiers that conversations may use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelCatalog {
    models: BTreeSet<ModelId>,
}

impl ModelCatalog {
    /// Build a catalog from model ids.
    #[must_use]
    pub fn new(models: impl IntoIterator<Item = ModelId>) -> Self {
        Self {
            models: models.into_iter().collect(),
        }
    }

    /// Parse a comma-separated list such as `gpt-4,gpt-3.5-turbo`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if any entry is not a valid model id.
    pub fn parse_list(raw: &str) -> ConversationResult<Self> {
        let models = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                ModelId::new(entry).map_err(|err| {
                    ConversationError::InvalidConfig(format!("model {entry:?}: {err}"))
                })
            })
            .collect::<ConversationResult<BTreeSet<_>>>()?;
        Ok(Self { models })
    }

    /// Whether `model` is allowed.
    #[must_use]
    pub fn contains(&self, model: &ModelId) -> bool {
        self.models.contains(model)
    }

    /// Iterate allowed models in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &ModelId> {
        self.models.iter()
    }

    /// Number of allowed models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// True when nothing is allowed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Keep only the models the provider reports as available.
    #[must_use]
    pub fn retain_available(&self, available: &[ModelId]) -> Self {
        Self {
            models: self
                .models
                .iter()
                .filter(|model| available.contains(model))
                .cloned()
                .collect(),
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_MODELS.iter().filter_map(|m| ModelId::new(m).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(raw: &str) -> ModelId {
        ModelId::from_trusted(raw)
    }

    #[test]
    fn test_default_models_are_valid() {
        for raw in DEFAULT_MODELS {
            assert!(ModelId::new(raw).is_ok(), "{raw}");
        }
        assert_eq!(ModelCatalog::default().len(), DEFAULT_MODELS.len());
    }

    #[test]
    fn test_defaults_pass_validation() {
        let params = GenerationParams::default();
        assert!(params.validate(&ModelCatalog::default()).is_ok());
    }

    #[test]
    fn test_temperature_out_of_range_is_rejected() {
        let params = GenerationParams {
            temperature: 1.5,
            ..GenerationParams::default()
        };
        let err = params.validate(&ModelCatalog::default());
        assert!(matches!(
            err,
            Err(ConversationError::InvalidParameter {
                name: "temperature",
                ..
            })
        ));
    }

    #[test]
    fn test_penalty_bounds_are_inclusive() {
        let params = GenerationParams {
            frequency_penalty: -2.0,
            presence_penalty: 2.0,
            ..GenerationParams::default()
        };
        assert!(params.validate(&ModelCatalog::default()).is_ok());

        let params = GenerationParams {
            presence_penalty: 2.01,
            ..GenerationParams::default()
        };
        assert!(params.validate(&ModelCatalog::default()).is_err());
    }

    #[test]
    fn test_nan_is_rejected() {
        let params = GenerationParams {
            top_p: f64::NAN,
            ..GenerationParams::default()
        };
        assert!(params.validate(&ModelCatalog::default()).is_err());
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let params = GenerationParams {
            model: model("davinci"),
            ..GenerationParams::default()
        };
        let err = params.validate(&ModelCatalog::default());
        assert!(matches!(
            err,
            Err(ConversationError::InvalidParameter { name: "model", .. })
        ));
    }

    #[test]
    fn test_merge_only_touches_patched_fields() {
        let base = GenerationParams::default();
        let patch = ParameterPatch {
            temperature: Some(0.2),
            system_prompt: Some("Be brief.".to_string()),
            ..ParameterPatch::default()
        };
        let merged = base.merged(&patch);
        assert!((merged.temperature - 0.2).abs() < f64::EPSILON);
        assert_eq!(merged.system_prompt, "Be brief.");
        assert_eq!(merged.model, base.model);
        assert!((merged.top_p - base.top_p).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_list_and_retain() {
        let catalog = ModelCatalog::parse_list("gpt-4, gpt-3.5-turbo,,").unwrap_or_default();
        assert_eq!(catalog.len(), 2);
        assert!(ModelCatalog::parse_list("gpt 4").is_err());

        let narrowed = catalog.retain_available(&[model("gpt-4"), model("whisper-1")]);
        assert_eq!(narrowed.iter().collect::<Vec<_>>(), vec![&model("gpt-4")]);
    }
}
