//! Reader configuration.
//!
//! [`ReaderConfig`] is the typed form: every mode carries the parameters it
//! needs, so an invalid combination cannot be represented. [`ReaderSettings`]
//! is the flat, string-keyed form read from flags or files; converting it is
//! where unsupported mode names and missing parameters are reported.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MAX_JUMP_STEP;
use crate::error::{GlimpseError, Result};

/// How document and query tokens are compared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interaction {
    /// 1.0 where the token ids are equal.
    Indicator,
    /// Raw embedding dot product.
    #[default]
    Dot,
    /// Dot product over the product of L2 norms (no epsilon guard).
    Cosine,
}

impl Interaction {
    pub fn all() -> [Interaction; 3] {
        [Interaction::Indicator, Interaction::Dot, Interaction::Cosine]
    }
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interaction::Indicator => write!(f, "indicator"),
            Interaction::Dot => write!(f, "dot"),
            Interaction::Cosine => write!(f, "cosine"),
        }
    }
}

impl FromStr for Interaction {
    type Err = GlimpseError;

    fn from_str(s: &str) -> Result<Self> {
        Interaction::all()
            .into_iter()
            .find(|i| i.to_string() == s)
            .ok_or_else(|| GlimpseError::config(format!("unknown interaction '{s}'")))
    }
}

/// Where to look next, given the last committed region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlimpseMode {
    /// `size` document rows right after the current region.
    FixHard { size: usize },
    /// Everything from right after the current region to the document end.
    AllNext,
}

/// Which sub-region of the glimpse to commit to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JumpMode {
    /// The single row with the largest absolute match.
    MaxHard,
    /// Delegated to an external [`DensityJumper`](super::jump::DensityJumper).
    MinDensityHard { min_density: f32 },
    /// Advance one row per step; used to exercise the loop.
    Test,
}

/// How a committed region is scored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepresentMode {
    /// Sum of the match values inside the region.
    SumHard,
    /// Inner product of RNN encodings of the document and query slices.
    RnnHard { rnn_size: usize },
    /// Constant 1.
    Test,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReaderConfig {
    pub interaction: Interaction,
    pub glimpse: GlimpseMode,
    pub jump: JumpMode,
    pub represent: RepresentMode,
    pub max_jump_step: usize,
    /// Upper bound on both extents of a committed region.
    pub max_jump_offset: Option<f32>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            interaction: Interaction::Dot,
            glimpse: GlimpseMode::FixHard { size: 1 },
            jump: JumpMode::MaxHard,
            represent: RepresentMode::SumHard,
            max_jump_step: DEFAULT_MAX_JUMP_STEP,
            max_jump_offset: None,
        }
    }
}

impl ReaderConfig {
    pub fn validate(&self) -> Result<()> {
        if let GlimpseMode::FixHard { size: 0 } = self.glimpse {
            return Err(GlimpseError::config("glimpse_fix_size must be positive"));
        }
        if let JumpMode::MinDensityHard { min_density } = self.jump {
            if !min_density.is_finite() {
                return Err(GlimpseError::config(format!(
                    "min_density must be finite, got {min_density}"
                )));
            }
        }
        if let RepresentMode::RnnHard { rnn_size: 0 } = self.represent {
            return Err(GlimpseError::config("rnn_size must be positive"));
        }
        if let Some(offset) = self.max_jump_offset {
            if offset.is_nan() || offset <= 0.0 {
                return Err(GlimpseError::config(format!(
                    "max_jump_offset must be positive, got {offset}"
                )));
            }
        }
        Ok(())
    }
}

/// Flat settings with mode names as strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    pub interaction: String,
    pub glimpse: String,
    pub glimpse_fix_size: Option<usize>,
    pub jump: String,
    pub min_density: Option<f32>,
    pub max_jump_offset: Option<f32>,
    pub represent: String,
    pub rnn_size: Option<usize>,
    pub max_jump_step: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            interaction: "dot".into(),
            glimpse: "fix_hard".into(),
            glimpse_fix_size: None,
            jump: "max_hard".into(),
            min_density: None,
            max_jump_offset: None,
            represent: "sum_hard".into(),
            rnn_size: None,
            max_jump_step: DEFAULT_MAX_JUMP_STEP,
        }
    }
}

impl ReaderSettings {
    /// Parse settings from JSON. Missing keys take their default values.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| GlimpseError::config(format!("reader settings: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GlimpseError::config(format!("reader settings: {e}")))
    }
}

fn required<T>(value: Option<T>, name: &str, mode: &str) -> Result<T> {
    value.ok_or_else(|| GlimpseError::config(format!("{name} is required for {mode}")))
}

impl TryFrom<ReaderSettings> for ReaderConfig {
    type Error = GlimpseError;

    fn try_from(s: ReaderSettings) -> Result<Self> {
        let interaction = s.interaction.parse()?;
        let glimpse = match s.glimpse.as_str() {
            "fix_hard" => GlimpseMode::FixHard {
                size: required(s.glimpse_fix_size, "glimpse_fix_size", "fix_hard")?,
            },
            "all_next" => GlimpseMode::AllNext,
            other => return Err(GlimpseError::config(format!("unknown glimpse '{other}'"))),
        };
        let jump = match s.jump.as_str() {
            "max_hard" => JumpMode::MaxHard,
            "min_density_hard" => JumpMode::MinDensityHard {
                min_density: required(s.min_density, "min_density", "min_density_hard")?,
            },
            "test" => JumpMode::Test,
            other => return Err(GlimpseError::config(format!("unknown jump '{other}'"))),
        };
        let represent = match s.represent.as_str() {
            "sum_hard" => RepresentMode::SumHard,
            "rnn_hard" => RepresentMode::RnnHard {
                rnn_size: required(s.rnn_size, "rnn_size", "rnn_hard")?,
            },
            "test" => RepresentMode::Test,
            other => return Err(GlimpseError::config(format!("unknown represent '{other}'"))),
        };
        let config = ReaderConfig {
            interaction,
            glimpse,
            jump,
            represent,
            max_jump_step: s.max_jump_step,
            max_jump_offset: s.max_jump_offset,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_parse() {
        for i in Interaction::all() {
            assert_eq!(i.to_string().parse::<Interaction>().unwrap(), i);
        }
        assert!(matches!(
            "euclid".parse::<Interaction>(),
            Err(GlimpseError::Configuration(_))
        ));
    }

    #[test]
    fn test_settings_conversion() {
        let settings = ReaderSettings {
            interaction: "cosine".into(),
            glimpse: "fix_hard".into(),
            glimpse_fix_size: Some(2),
            jump: "min_density_hard".into(),
            min_density: Some(0.5),
            represent: "rnn_hard".into(),
            rnn_size: Some(8),
            max_jump_step: 4,
            ..Default::default()
        };
        let config = ReaderConfig::try_from(settings).unwrap();
        assert_eq!(config.interaction, Interaction::Cosine);
        assert_eq!(config.glimpse, GlimpseMode::FixHard { size: 2 });
        assert_eq!(config.jump, JumpMode::MinDensityHard { min_density: 0.5 });
        assert_eq!(config.represent, RepresentMode::RnnHard { rnn_size: 8 });
        assert_eq!(config.max_jump_step, 4);
    }

    #[test]
    fn test_missing_required_parameters() {
        // fix_hard without a size
        assert!(ReaderConfig::try_from(ReaderSettings::default()).is_err());

        let base = ReaderSettings {
            glimpse: "all_next".into(),
            ..Default::default()
        };
        assert!(ReaderConfig::try_from(base.clone()).is_ok());

        let no_density = ReaderSettings {
            jump: "min_density_hard".into(),
            ..base.clone()
        };
        assert!(ReaderConfig::try_from(no_density).is_err());

        let no_rnn = ReaderSettings {
            represent: "rnn_hard".into(),
            ..base
        };
        assert!(ReaderConfig::try_from(no_rnn).is_err());
    }

    #[test]
    fn test_unknown_modes_fail_fast() {
        for (field, value) in [("glimpse", "soft"), ("jump", "max_soft"), ("represent", "mean")] {
            let mut s = ReaderSettings {
                glimpse: "all_next".into(),
                ..Default::default()
            };
            match field {
                "glimpse" => s.glimpse = value.into(),
                "jump" => s.jump = value.into(),
                _ => s.represent = value.into(),
            }
            let err = ReaderConfig::try_from(s).unwrap_err();
            assert!(err.to_string().contains(value), "{err}");
        }
    }

    #[test]
    fn test_settings_from_json() {
        let s = ReaderSettings::from_json(
            r#"{"glimpse": "all_next", "represent": "rnn_hard", "rnn_size": 6}"#,
        )
        .unwrap();
        assert_eq!(s.glimpse, "all_next");
        assert_eq!(s.rnn_size, Some(6));
        // untouched keys keep their defaults
        assert_eq!(s.interaction, "dot");
        assert_eq!(s.max_jump_step, DEFAULT_MAX_JUMP_STEP);
        let config = ReaderConfig::try_from(s).unwrap();
        assert_eq!(config.represent, RepresentMode::RnnHard { rnn_size: 6 });
    }

    #[test]
    fn test_settings_json_round_trip() {
        let settings = ReaderSettings {
            jump: "min_density_hard".into(),
            min_density: Some(0.25),
            max_jump_offset: Some(3.0),
            glimpse_fix_size: Some(2),
            ..Default::default()
        };
        let text = settings.to_json().unwrap();
        assert!(text.contains("\"min_density_hard\""));
        assert_eq!(ReaderSettings::from_json(&text).unwrap(), settings);
    }

    #[test]
    fn test_settings_json_errors() {
        assert!(matches!(
            ReaderSettings::from_json("{\"max_jump_step\": -1}"),
            Err(GlimpseError::Configuration(_))
        ));
        assert!(ReaderSettings::from_json("not json").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ReaderConfig::default().validate().is_ok());
        let bad = ReaderConfig {
            glimpse: GlimpseMode::FixHard { size: 0 },
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = ReaderConfig {
            max_jump_offset: Some(0.0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
