use super::Target;
use rand::Rng;
use std::sync::Arc;

/// Uniform random selection over the live sublist; a fair PRNG is enough,
/// nothing here needs cryptographic randomness.
pub struct RandomBalancer {
    targets: Vec<Arc<Target>>,
}

impl RandomBalancer {
    pub fn new(targets: Vec<Arc<Target>>) -> Self {
        Self { targets }
    }

    pub fn next(&self) -> Option<Arc<Target>> {
        if self.targets.is_empty() {
            return None;
        }

        let live: Vec<&Arc<Target>> = self.targets.iter().filter(|t| t.is_live()).collect();
        let mut rng = rand::thread_rng();
        if live.is_empty() {
            let idx = rng.gen_range(0..self.targets.len());
            return Some(self.targets[idx].clone());
        }
        Some(live[rng.gen_range(0..live.len())].clone())
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }
}
