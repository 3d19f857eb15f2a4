use rand::Rng;

/// Injectable source of randomness, so jitter, fingerprint sampling and
/// activity envelope generation can be tested deterministically.
pub trait RandomSource: Send + Sync {
    fn uniform(&self, lo: f64, hi: f64) -> f64;

    fn bernoulli(&self, p: f64) -> bool;

    /// Pick an index in `[0, len)`, used for weighted device/template choice.
    fn index(&self, len: usize) -> usize;
}

/// Production randomness backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn uniform(&self, lo: f64, hi: f64) -> f64 {
        rand::thread_rng().gen_range(lo..hi)
    }

    fn bernoulli(&self, p: f64) -> bool {
        rand::thread_rng().gen_bool(p.clamp(0.0, 1.0))
    }

    fn index(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}
