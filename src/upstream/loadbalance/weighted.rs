use super::Target;
use std::sync::{Arc, Mutex};

/// Smooth weighted round-robin, gcd-interleaved: across `sum(weights)`
/// selections target `i` is chosen `weights[i]` times without the clumping
/// of naive expansion. The cursor state is tiny, so a mutex is fine here —
/// the critical section is a few integer compares.
pub struct WeightedBalancer {
    targets: Vec<Arc<Target>>,
    gcd: u32,
    max_weight: u32,
    cursor: Mutex<Cursor>,
}

struct Cursor {
    index: usize,
    current_weight: i64,
}

impl WeightedBalancer {
    pub fn new(targets: Vec<Arc<Target>>) -> Self {
        let gcd = targets
            .iter()
            .map(|t| t.weight)
            .filter(|w| *w > 0)
            .fold(0, gcd)
            .max(1);
        let max_weight = targets.iter().map(|t| t.weight).max().unwrap_or(0);
        let start_index = targets.len().saturating_sub(1);

        Self {
            targets,
            gcd,
            max_weight,
            cursor: Mutex::new(Cursor {
                index: start_index,
                current_weight: 0,
            }),
        }
    }

    /// Advance the index modulo N; on wrap lower `current_weight` by the gcd
    /// (resetting to the max weight when it hits zero); accept the current
    /// target iff its weight clears the threshold and it is live. Non-live
    /// targets are skipped mid-cycle; a fruitless full sweep falls back to
    /// the first target.
    pub fn next(&self) -> Option<Arc<Target>> {
        let n = self.targets.len();
        if n == 0 {
            return None;
        }

        let mut cursor = self
            .cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let levels = (self.max_weight / self.gcd).max(1) as usize;
        for _ in 0..n * (levels + 1) {
            cursor.index = (cursor.index + 1) % n;
            if cursor.index == 0 {
                cursor.current_weight -= self.gcd as i64;
                if cursor.current_weight <= 0 {
                    cursor.current_weight = self.max_weight as i64;
                }
            }
            let target = &self.targets[cursor.index];
            if (target.weight as i64) >= cursor.current_weight && target.is_live() {
                return Some(target.clone());
            }
        }

        Some(self.targets[0].clone())
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if a == 0 {
        b
    } else {
        gcd(b % a, a)
    }
}
