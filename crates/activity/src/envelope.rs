use common::RandomSource;

/// Per-account hourly activity envelope: 24 multipliers in [0,1] plus the
/// derived sleep window, sampled once at account first-seen so no two
/// accounts look identical.
#[derive(Debug, Clone)]
pub struct ActivityEnvelope {
    /// `hourly[h]` is the multiplier for account-local hour `h`.
    pub hourly: [f64; 24],
    pub sleep_start_hour: u32,
    pub sleep_end_hour: u32,
    /// Stable per-account seeds for the behavioral pattern scores folded
    /// into the ban-probability formula by the risk engine.
    pub response_pattern_score: f64,
    pub timing_pattern_score: f64,
}

impl ActivityEnvelope {
    /// Sample a fresh envelope. Deep-night hours are near-silent, daytime
    /// and evening hours are active, with per-account jitter so the shape
    /// is plausible but never identical across accounts.
    pub fn generate(rng: &dyn RandomSource) -> Self {
        let mut hourly = [0.0; 24];
        for (hour, slot) in hourly.iter_mut().enumerate() {
            let (lo, hi) = base_range(hour as u32);
            *slot = rng.uniform(lo, hi);
        }

        let sleep_start_hour = rng.index(3) as u32 + 1; // 01..03
        let sleep_end_hour = 6 + rng.index(3) as u32; // 06..08

        Self {
            hourly,
            sleep_start_hour,
            sleep_end_hour,
            response_pattern_score: rng.uniform(0.4, 1.0),
            timing_pattern_score: rng.uniform(0.4, 1.0),
        }
    }

    pub fn multiplier(&self, local_hour: u32, is_weekend: bool) -> f64 {
        let base = self.hourly[(local_hour % 24) as usize];
        if is_weekend {
            (base * 0.9).clamp(0.0, 1.0)
        } else {
            base
        }
    }

    pub fn is_sleeping(&self, local_hour: u32) -> bool {
        if self.sleep_start_hour <= self.sleep_end_hour {
            local_hour >= self.sleep_start_hour && local_hour < self.sleep_end_hour
        } else {
            local_hour >= self.sleep_start_hour || local_hour < self.sleep_end_hour
        }
    }
}

fn base_range(hour: u32) -> (f64, f64) {
    match hour {
        2..=6 => (0.02, 0.10),
        7..=8 => (0.3, 0.6),
        9..=17 => (0.5, 0.9),
        18..=21 => (0.8, 1.0),
        22..=23 => (0.4, 0.7),
        _ => (0.4, 0.7), // 0, 1 — late evening carryover
    }
}
