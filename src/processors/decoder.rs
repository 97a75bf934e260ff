//! Beam-tilt class extraction from EPU micrograph filenames.
//!
//! EPU names its exposures after the foil hole and acquisition ids, e.g.
//!
//! ```text
//! FoilHole_30971252_Data_30970979_30970980_20181130_1720-32039.mrc
//!                        ^^^^^^^^ ^^^^^^^^
//! ```
//!
//! One of the numeric runs identifies the beam-tilt setting the image was
//! recorded with. Which run depends on the tool that produced the metadata,
//! so each variant picks a [`Convention`].

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DecodeConfig;
use crate::processors::registry::BeamTiltClass;

lazy_static! {
    static ref DIGIT_RUN: Regex = Regex::new(r"\d+").unwrap();
    static ref EIGHT_DIGITS: Regex = Regex::new(r"\d{8}").unwrap();
}

/// Minimum number of digit runs the sequential convention needs.
const SEQUENTIAL_MIN_TOKENS: usize = 3;

/// Position of the class within the sequential token list.
const SEQUENTIAL_CLASS_INDEX: usize = 2;

/// Errors raised when a filename cannot be decoded under a strict policy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("filename '{filename}' does not contain marker '{marker}'")]
    MissingMarker { filename: String, marker: String },

    #[error("filename '{filename}' yields {found} numeric tokens, {convention} convention expects {expected}")]
    TokenCount {
        filename: String,
        convention: &'static str,
        found: usize,
        expected: &'static str,
    },
}

/// Filename-to-token-position rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// STAR pathway: every digit run, class is the third.
    Sequential,
    /// cs pathway: digit runs of width 6..=8, class at index 3 of 6 or 2 of 5.
    BoundedWidth,
    /// Line-streaming pathway: 8-digit runs, class at a configured index.
    EightDigit { index: usize },
}

impl Convention {
    fn name(&self) -> &'static str {
        match self {
            Convention::Sequential => "sequential",
            Convention::BoundedWidth => "bounded-width",
            Convention::EightDigit { .. } => "eight-digit",
        }
    }

    fn requires_marker(&self) -> bool {
        !matches!(self, Convention::EightDigit { .. })
    }
}

/// What to do with filenames that do not follow the naming scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Merge them into the default class.
    Lenient,
    /// Fail the run.
    Strict,
}

/// Maximal runs of decimal digits, in order of appearance.
pub fn digit_runs(filename: &str) -> Vec<&str> {
    DIGIT_RUN.find_iter(filename).map(|m| m.as_str()).collect()
}

/// Digit runs of width 6..=8 that are not part of a longer run.
pub fn bounded_digit_runs(filename: &str) -> Vec<&str> {
    DIGIT_RUN
        .find_iter(filename)
        .map(|m| m.as_str())
        .filter(|run| (6..=8).contains(&run.len()))
        .collect()
}

/// Non-overlapping 8-digit windows, scanning left to right.
pub fn eight_digit_runs(filename: &str) -> Vec<&str> {
    EIGHT_DIGITS.find_iter(filename).map(|m| m.as_str()).collect()
}

/// Decodes filenames into beam-tilt classes under one convention.
#[derive(Debug, Clone)]
pub struct FilenameDecoder {
    convention: Convention,
    policy: DecodePolicy,
    marker: String,
    default_class: BeamTiltClass,
}

impl FilenameDecoder {
    pub fn new(convention: Convention, policy: DecodePolicy) -> Self {
        Self::from_config(convention, policy, &DecodeConfig::default())
    }

    pub fn from_config(convention: Convention, policy: DecodePolicy, config: &DecodeConfig) -> Self {
        Self {
            convention,
            policy,
            marker: config.marker.clone(),
            default_class: BeamTiltClass::new(config.default_class.clone()),
        }
    }

    /// Tokens the convention extracts from `filename`.
    pub fn tokens<'a>(&self, filename: &'a str) -> Vec<&'a str> {
        match self.convention {
            Convention::Sequential => digit_runs(filename),
            Convention::BoundedWidth => bounded_digit_runs(filename),
            Convention::EightDigit { .. } => eight_digit_runs(filename),
        }
    }

    /// Recover the beam-tilt class encoded in `filename`.
    pub fn decode(&self, filename: &str) -> Result<BeamTiltClass, DecodeError> {
        if self.convention.requires_marker() && !filename.contains(&self.marker) {
            return self.fallback(DecodeError::MissingMarker {
                filename: filename.to_string(),
                marker: self.marker.clone(),
            });
        }

        let tokens = self.tokens(filename);
        let picked = match self.convention {
            Convention::Sequential => {
                if tokens.len() >= SEQUENTIAL_MIN_TOKENS {
                    Some(tokens[SEQUENTIAL_CLASS_INDEX])
                } else {
                    None
                }
            }
            Convention::BoundedWidth => match tokens.len() {
                // leading numeric prefix in front of FoilHole
                6 => Some(tokens[3]),
                5 => Some(tokens[2]),
                _ => None,
            },
            Convention::EightDigit { index } => tokens.get(index).copied(),
        };

        match picked {
            Some(token) => Ok(BeamTiltClass::new(token)),
            None => self.fallback(DecodeError::TokenCount {
                filename: filename.to_string(),
                convention: self.convention.name(),
                found: tokens.len(),
                expected: self.expected_tokens(),
            }),
        }
    }

    fn expected_tokens(&self) -> &'static str {
        match self.convention {
            Convention::Sequential => "at least 3",
            Convention::BoundedWidth => "5 or 6",
            Convention::EightDigit { .. } => "more than the class index",
        }
    }

    fn fallback(&self, err: DecodeError) -> Result<BeamTiltClass, DecodeError> {
        match self.policy {
            DecodePolicy::Lenient => {
                log::debug!("{}; using default class {}", err, self.default_class);
                Ok(self.default_class.clone())
            }
            DecodePolicy::Strict => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPU_NAME: &str = "FoilHole_30971252_Data_30970979_30970980_20181130_1720-32039.mrc";

    #[test]
    fn test_digit_runs() {
        assert_eq!(
            digit_runs(EPU_NAME),
            vec!["30971252", "30970979", "30970980", "20181130", "1720", "32039"]
        );
        assert!(digit_runs("no_digits.mrc").is_empty());
    }

    #[test]
    fn test_bounded_digit_runs_skip_long_and_short() {
        // 14-digit timestamp and 4-digit counter are both ignored
        let name = "FoilHole_1234567_Data_12345678_20181130172000_1720.mrc";
        assert_eq!(bounded_digit_runs(name), vec!["1234567", "12345678"]);
    }

    #[test]
    fn test_sequential_takes_third_token() {
        let decoder = FilenameDecoder::new(Convention::Sequential, DecodePolicy::Lenient);
        assert_eq!(decoder.decode(EPU_NAME).unwrap().as_str(), "30970980");
    }

    #[test]
    fn test_sequential_with_exactly_three_tokens() {
        let decoder = FilenameDecoder::new(Convention::Sequential, DecodePolicy::Strict);
        let name = "FoilHole_11111111_Data_22222222_33333333.mrc";
        assert_eq!(decoder.decode(name).unwrap().as_str(), "33333333");
    }

    #[test]
    fn test_missing_marker_defaults_when_lenient() {
        let decoder = FilenameDecoder::new(Convention::Sequential, DecodePolicy::Lenient);
        let class = decoder.decode("Micrographs/mic_001_002_003.mrc").unwrap();
        assert_eq!(class.as_str(), "1");

        let decoder = FilenameDecoder::new(Convention::BoundedWidth, DecodePolicy::Lenient);
        assert_eq!(decoder.decode("stack_123456_234567.mrcs").unwrap().as_str(), "1");
    }

    #[test]
    fn test_missing_marker_fails_when_strict() {
        let decoder = FilenameDecoder::new(Convention::Sequential, DecodePolicy::Strict);
        let err = decoder.decode("mic_001.mrc").unwrap_err();
        assert!(matches!(err, DecodeError::MissingMarker { .. }));
    }

    #[test]
    fn test_sequential_too_few_tokens() {
        let lenient = FilenameDecoder::new(Convention::Sequential, DecodePolicy::Lenient);
        assert_eq!(lenient.decode("FoilHole_12_Data.mrc").unwrap().as_str(), "1");

        let strict = FilenameDecoder::new(Convention::Sequential, DecodePolicy::Strict);
        match strict.decode("FoilHole_12_Data.mrc").unwrap_err() {
            DecodeError::TokenCount { found, .. } => assert_eq!(found, 1),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_bounded_width_five_tokens() {
        let decoder = FilenameDecoder::new(Convention::BoundedWidth, DecodePolicy::Strict);
        let name = "FoilHole_30971252_Data_30970979_30970980_20181130_172032.mrc";
        assert_eq!(bounded_digit_runs(name).len(), 5);
        assert_eq!(decoder.decode(name).unwrap().as_str(), "30970980");
    }

    #[test]
    fn test_bounded_width_six_tokens_with_prefix() {
        let decoder = FilenameDecoder::new(Convention::BoundedWidth, DecodePolicy::Strict);
        let name = "012345_FoilHole_30971252_Data_30970979_30970980_20181130_172032_patch.mrc";
        assert_eq!(bounded_digit_runs(name).len(), 6);
        assert_eq!(decoder.decode(name).unwrap().as_str(), "30970980");
    }

    #[test]
    fn test_bounded_width_other_counts() {
        let lenient = FilenameDecoder::new(Convention::BoundedWidth, DecodePolicy::Lenient);
        assert_eq!(lenient.decode(EPU_NAME).unwrap().as_str(), "1");

        let strict = FilenameDecoder::new(Convention::BoundedWidth, DecodePolicy::Strict);
        assert!(strict.decode(EPU_NAME).is_err());
    }

    #[test]
    fn test_eight_digit_second_run() {
        let decoder =
            FilenameDecoder::new(Convention::EightDigit { index: 1 }, DecodePolicy::Strict);
        assert_eq!(decoder.decode(EPU_NAME).unwrap().as_str(), "30970979");
        // no marker needed
        assert_eq!(
            decoder.decode("x_12345678_87654321.mrc").unwrap().as_str(),
            "87654321"
        );
        assert!(decoder.decode("x_12345678.mrc").is_err());
    }

    #[test]
    fn test_custom_marker_and_default() {
        let config = DecodeConfig {
            marker: "GridSquare".to_string(),
            default_class: "0".to_string(),
            ..DecodeConfig::default()
        };
        let decoder =
            FilenameDecoder::from_config(Convention::Sequential, DecodePolicy::Lenient, &config);
        assert_eq!(decoder.decode(EPU_NAME).unwrap().as_str(), "0");
        assert_eq!(decoder.decode("GridSquare_1_2_3.mrc").unwrap().as_str(), "3");
    }
}
