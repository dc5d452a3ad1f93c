use super::Target;
use std::sync::Arc;

/// Least-connections: linear scan over live targets picking the minimum
/// in-flight count, first-seen breaking ties. The counter loads are relaxed
/// atomics and may drift relative to one another; that approximation is
/// acceptable for spreading load.
pub struct LeastConnBalancer {
    targets: Vec<Arc<Target>>,
}

impl LeastConnBalancer {
    pub fn new(targets: Vec<Arc<Target>>) -> Self {
        Self { targets }
    }

    pub fn next(&self) -> Option<Arc<Target>> {
        if self.targets.is_empty() {
            return None;
        }

        let mut best: Option<&Arc<Target>> = None;
        let mut best_count = usize::MAX;
        for target in &self.targets {
            if !target.is_live() {
                continue;
            }
            let count = target.in_flight();
            if count < best_count {
                best = Some(target);
                best_count = count;
            }
        }

        Some(best.unwrap_or(&self.targets[0]).clone())
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }
}
