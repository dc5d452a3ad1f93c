use super::Target;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Rotating selection over the target set. The cursor is a plain fetch-add;
/// no lock is taken on the hot path.
pub struct RoundRobinBalancer {
    targets: Vec<Arc<Target>>,
    cursor: AtomicU64,
}

impl RoundRobinBalancer {
    pub fn new(targets: Vec<Arc<Target>>) -> Self {
        Self {
            targets,
            cursor: AtomicU64::new(0),
        }
    }

    /// Pick the cursor position, then walk forward past non-live targets —
    /// at most one full lap. A lap with no live target yields the first
    /// target so recovery probes keep a selection to reach.
    pub fn next(&self) -> Option<Arc<Target>> {
        let n = self.targets.len();
        if n == 0 {
            return None;
        }
        let start = (self.cursor.fetch_add(1, Ordering::Relaxed) % n as u64) as usize;
        for offset in 0..n {
            let target = &self.targets[(start + offset) % n];
            if target.is_live() {
                return Some(target.clone());
            }
        }
        Some(self.targets[0].clone())
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }
}
