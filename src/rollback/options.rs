//! Collection options copied from the sync source during metadata resync

use serde_json::Value;

use crate::document::Document;

/// How strictly a validator applies to existing documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationLevel {
    Off,
    #[default]
    Strict,
    Moderate,
}

impl ValidationLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(Self::Off),
            "strict" => Some(Self::Strict),
            "moderate" => Some(Self::Moderate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Strict => "strict",
            Self::Moderate => "moderate",
        }
    }
}

/// What happens to a write that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationAction {
    #[default]
    Error,
    Warn,
}

impl ValidationAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "error" => Some(Self::Error),
            "warn" => Some(Self::Warn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
        }
    }
}

/// The subset of collection options rollback restores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionOptions {
    pub temp: bool,
    pub validator: Document,
    pub validation_level: ValidationLevel,
    pub validation_action: ValidationAction,
}

impl CollectionOptions {
    /// Parse an `options` document as reported by `listCollections`.
    ///
    /// Fields other than the ones restored here are ignored.
    pub fn parse(options: &Document) -> Result<Self, String> {
        let mut parsed = Self::default();

        if let Some(temp) = options.get("temp") {
            parsed.temp = temp
                .as_bool()
                .ok_or_else(|| format!("'temp' must be a boolean, got {}", temp))?;
        }

        if let Some(validator) = options.get("validator") {
            parsed.validator = validator
                .as_object()
                .cloned()
                .ok_or_else(|| format!("'validator' must be a document, got {}", validator))?;
        }

        if let Some(level) = options.get("validationLevel") {
            parsed.validation_level = level
                .as_str()
                .and_then(ValidationLevel::parse)
                .ok_or_else(|| format!("invalid validationLevel {}", level))?;
        }

        if let Some(action) = options.get("validationAction") {
            parsed.validation_action = action
                .as_str()
                .and_then(ValidationAction::parse)
                .ok_or_else(|| format!("invalid validationAction {}", action))?;
        }

        Ok(parsed)
    }

    /// Render back into `options` form.
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        if self.temp {
            document.insert("temp".into(), Value::Bool(true));
        }
        if !self.validator.is_empty() {
            document.insert("validator".into(), Value::Object(self.validator.clone()));
            document.insert(
                "validationLevel".into(),
                Value::String(self.validation_level.as_str().into()),
            );
            document.insert(
                "validationAction".into(),
                Value::String(self.validation_action.as_str().into()),
            );
        }
        document
    }
}
