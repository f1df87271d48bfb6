//! Numerically stable running statistics for per-axis guide error.

/// Single-pass mean/stdev/peak-absolute accumulator, Welford's online
/// algorithm. Subtraction-free update path keeps this stable over long
/// guiding sessions; do not replace with the naive sum-of-squares formula.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulator {
    n: u64,
    mean: f64,
    m2: f64,
    peak: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one more sample into the running statistics.
    pub fn add(&mut self, x: f64) {
        let ax = x.abs();
        if ax > self.peak {
            self.peak = ax;
        }
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += (x - self.mean) * delta;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stdev(&self) -> f64 {
        if self.n >= 1 {
            (self.m2 / self.n as f64).sqrt()
        } else {
            0.0
        }
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Cumulative guide stats since guiding started or settling last completed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GuideStats {
    pub rms_tot: f64,
    pub rms_ra: f64,
    pub rms_dec: f64,
    pub peak_ra: f64,
    pub peak_dec: f64,
}

/// Snapshot the two per-axis accumulators into a `GuideStats`. `rms_tot` is
/// left at 0 here; callers that read the stats out of the session compute
/// it at read time via `hypot` per the session lock's published snapshot.
pub fn snapshot(ra: &Accumulator, dec: &Accumulator) -> GuideStats {
    GuideStats {
        rms_tot: 0.0,
        rms_ra: ra.stdev(),
        rms_dec: dec.stdev(),
        peak_ra: ra.peak(),
        peak_dec: dec.peak(),
    }
}
