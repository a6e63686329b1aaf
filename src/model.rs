//! Generation model identifiers.

use std::borrow::Cow;

/// Name of a generation model, as sent to the service.
///
/// The well-known models are available as constants; any other identifier
/// can be used through [`Model::custom`] or by parsing a string.
///
/// ```rust
/// use slabmap::Model;
///
/// let model: Model = "gpt-5-mini".parse().unwrap();
/// assert_eq!(model, Model::GPT5_MINI);
/// assert_eq!(Model::custom("my-finetune").id(), "my-finetune");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Model(Cow<'static, str>);

impl Model {
    /// `gpt-5-nano`
    pub const GPT5_NANO: Self = Self(Cow::Borrowed("gpt-5-nano"));
    /// `gpt-5-mini`
    pub const GPT5_MINI: Self = Self(Cow::Borrowed("gpt-5-mini"));
    /// `gpt-5`
    pub const GPT5: Self = Self(Cow::Borrowed("gpt-5"));
    /// `gpt-5.1`
    pub const GPT51: Self = Self(Cow::Borrowed("gpt-5.1"));

    /// Any other model identifier.
    #[must_use]
    pub fn custom(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    /// The identifier sent to the service.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::GPT5_NANO
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("model name must not be empty".to_string());
        }
        Ok(match s {
            "gpt-5-nano" => Self::GPT5_NANO,
            "gpt-5-mini" => Self::GPT5_MINI,
            "gpt-5" => Self::GPT5,
            "gpt-5.1" => Self::GPT51,
            other => Self::custom(other),
        })
    }
}
