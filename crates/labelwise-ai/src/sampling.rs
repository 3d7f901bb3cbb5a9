//! Sampling policies: pick the next sample to show an annotator.

use std::sync::Arc;

use labelwise_core::{Id, Sample, SamplingService, SamplingStrategy};
use rand::seq::IndexedRandom;

/// Uniform random choice over the candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSampling;

impl SamplingService for RandomSampling {
    fn sample(&self, candidates: &[Sample]) -> Option<Id> {
        candidates.choose(&mut rand::rng()).map(|s| s.id.clone())
    }
}

/// Prefer the sample the model is least sure about.
///
/// Samples without any estimate come first. Otherwise the sample whose best
/// class confidence is lowest wins; ties go to the earlier candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastConfidentSampling;

impl SamplingService for LeastConfidentSampling {
    fn sample(&self, candidates: &[Sample]) -> Option<Id> {
        candidates
            .iter()
            .min_by(|a, b| top_confidence(a).total_cmp(&top_confidence(b)))
            .map(|s| s.id.clone())
    }
}

fn top_confidence(sample: &Sample) -> f32 {
    sample
        .estimates
        .iter()
        .map(|e| e.confidence)
        .fold(f32::NEG_INFINITY, f32::max)
}

pub fn sampling_service(strategy: SamplingStrategy) -> Arc<dyn SamplingService> {
    match strategy {
        SamplingStrategy::Random => Arc::new(RandomSampling),
        SamplingStrategy::LeastConfident => Arc::new(LeastConfidentSampling),
    }
}
