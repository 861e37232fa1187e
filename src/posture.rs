use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sitting posture classes, in label-encoder order.
///
/// The declaration order is also the iteration and tie-break order used by
/// [`Distribution`](crate::classifier::Distribution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Posture {
    #[serde(rename = "Correct_posture")]
    Correct,
    #[serde(rename = "Leaning_backward")]
    LeaningBackward,
    #[serde(rename = "Leaning_forward")]
    LeaningForward,
    #[serde(rename = "Leaning_left")]
    LeaningLeft,
    #[serde(rename = "Leaning_right")]
    LeaningRight,
    #[serde(rename = "Left_leg_crossed")]
    LeftLegCrossed,
    #[serde(rename = "Right_leg_crossed")]
    RightLegCrossed,
    #[serde(rename = "Sitting_at_front_edge")]
    SittingAtFrontEdge,
    #[serde(rename = "Upper_body_hunched")]
    UpperBodyHunched,
}

impl Posture {
    pub const COUNT: usize = 9;

    pub const ALL: [Posture; Self::COUNT] = [
        Posture::Correct,
        Posture::LeaningBackward,
        Posture::LeaningForward,
        Posture::LeaningLeft,
        Posture::LeaningRight,
        Posture::LeftLegCrossed,
        Posture::RightLegCrossed,
        Posture::SittingAtFrontEdge,
        Posture::UpperBodyHunched,
    ];

    /// Label string as written by the training pipeline
    pub fn as_str(&self) -> &'static str {
        match self {
            Posture::Correct => "Correct_posture",
            Posture::LeaningBackward => "Leaning_backward",
            Posture::LeaningForward => "Leaning_forward",
            Posture::LeaningLeft => "Leaning_left",
            Posture::LeaningRight => "Leaning_right",
            Posture::LeftLegCrossed => "Left_leg_crossed",
            Posture::RightLegCrossed => "Right_leg_crossed",
            Posture::SittingAtFrontEdge => "Sitting_at_front_edge",
            Posture::UpperBodyHunched => "Upper_body_hunched",
        }
    }
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Posture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Posture::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown posture label '{}'", s)))
    }
}

/// The closed subset of labels that should eventually raise a warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadPostures {
    labels: BTreeSet<Posture>,
}

impl BadPostures {
    pub fn new(labels: impl IntoIterator<Item = Posture>) -> Self {
        Self {
            labels: labels.into_iter().collect(),
        }
    }

    pub fn contains(&self, label: Posture) -> bool {
        self.labels.contains(&label)
    }

    pub fn iter(&self) -> impl Iterator<Item = Posture> + '_ {
        self.labels.iter().copied()
    }
}

impl Default for BadPostures {
    /// Everything except [`Posture::Correct`]
    fn default() -> Self {
        Self::new(Posture::ALL.into_iter().filter(|p| *p != Posture::Correct))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip_through_str() {
        for p in Posture::ALL {
            assert_eq!(p.as_str().parse::<Posture>().unwrap(), p);
        }
    }

    #[test]
    fn test_unknown_label_rejected() {
        let err = "Slouching".parse::<Posture>().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_serde_uses_encoder_strings() {
        let json = serde_json::to_string(&Posture::UpperBodyHunched).unwrap();
        assert_eq!(json, "\"Upper_body_hunched\"");
        let back: Posture = serde_json::from_str("\"Leaning_left\"").unwrap();
        assert_eq!(back, Posture::LeaningLeft);
    }

    #[test]
    fn test_ordering_follows_encoder() {
        let mut sorted = Posture::ALL;
        sorted.sort();
        assert_eq!(sorted, Posture::ALL);
    }

    #[test]
    fn test_default_bad_set_excludes_correct() {
        let bad = BadPostures::default();
        assert!(!bad.contains(Posture::Correct));
        assert_eq!(bad.iter().count(), Posture::COUNT - 1);
        assert!(bad.contains(Posture::LeaningForward));
    }

    #[test]
    fn test_custom_bad_set() {
        let bad = BadPostures::new([Posture::UpperBodyHunched]);
        assert!(bad.contains(Posture::UpperBodyHunched));
        assert!(!bad.contains(Posture::LeaningLeft));
    }
}
