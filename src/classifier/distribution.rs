use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::posture::Posture;

/// Probability per posture label.
///
/// Iteration follows [`Posture`] declaration order, which makes `argmax`
/// deterministic: among equal maxima the first label in that order wins.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Distribution(BTreeMap<Posture, f32>);

impl Distribution {
    /// Pair raw model probabilities with their labels and normalize to sum 1.
    ///
    /// Negative entries are clamped to zero. Length mismatch, non-finite
    /// values, or an all-zero vector are inference errors.
    pub fn from_probabilities(labels: &[Posture], probabilities: &[f32]) -> Result<Self> {
        if labels.len() != probabilities.len() {
            return Err(Error::Inference(format!(
                "model returned {} probabilities for {} labels",
                probabilities.len(),
                labels.len()
            )));
        }
        if let Some(bad) = probabilities.iter().find(|p| !p.is_finite()) {
            return Err(Error::Inference(format!("non-finite probability {}", bad)));
        }

        let mut map = BTreeMap::new();
        for (&label, &p) in labels.iter().zip(probabilities) {
            *map.entry(label).or_insert(0.0) += p.max(0.0);
        }

        let total: f32 = map.values().sum();
        if total <= 0.0 {
            return Err(Error::Inference("probability vector sums to zero".to_string()));
        }
        for p in map.values_mut() {
            *p /= total;
        }
        Ok(Self(map))
    }

    /// Unnormalized weighted sum `wa·a + wb·b` over the union of both label sets
    pub fn weighted_sum(a: &Distribution, wa: f32, b: &Distribution, wb: f32) -> Distribution {
        let mut fused = BTreeMap::new();
        for label in a.0.keys().chain(b.0.keys()) {
            fused
                .entry(*label)
                .or_insert_with(|| wa * a.get(*label) + wb * b.get(*label));
        }
        Self(fused)
    }

    /// Probability of `label`, 0 when the model does not know it
    pub fn get(&self, label: Posture) -> f32 {
        self.0.get(&label).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Posture, f32)> + '_ {
        self.0.iter().map(|(l, p)| (*l, *p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> f32 {
        self.0.values().sum()
    }

    pub fn argmax(&self) -> Option<(Posture, f32)> {
        let mut best: Option<(Posture, f32)> = None;
        for (label, p) in self.iter() {
            match best {
                Some((_, bp)) if p <= bp => {}
                _ => best = Some((label, p)),
            }
        }
        best
    }
}

impl FromIterator<(Posture, f32)> for Distribution {
    /// Raw construction, no normalization
    fn from_iter<I: IntoIterator<Item = (Posture, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Classifier verdict for one input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label: Posture,
    /// Probability of `label`, the maximum of the distribution
    pub confidence: f32,
    pub distribution: Distribution,
}

impl ClassificationResult {
    pub fn from_distribution(distribution: Distribution) -> Result<Self> {
        let (label, confidence) = distribution
            .argmax()
            .ok_or_else(|| Error::Inference("empty probability distribution".to_string()))?;
        Ok(Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            distribution,
        })
    }
}
