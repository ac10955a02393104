// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// One-shot sampling decision per session

use crate::protocol::{ReplayMode, SampleRates};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

/// Clamp a probability into [0, 1]. NaN becomes 0.
pub fn clamp_rate(name: &str, rate: f64) -> f64 {
    if rate.is_nan() {
        warn!("{} is NaN, using 0.0", name);
        return 0.0;
    }
    if !(0.0..=1.0).contains(&rate) {
        let clamped = rate.clamp(0.0, 1.0);
        warn!("{} {} is outside [0, 1], clamped to {}", name, rate, clamped);
        return clamped;
    }
    rate
}

/// Decides whether a new session records continuously, buffers for errors, or stays off
pub struct Sampler {
    rates: SampleRates,
    rng: StdRng,
}

impl Sampler {
    pub fn new(rates: SampleRates) -> Self {
        Self {
            rates,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sampler, used by tests and reproducible runs
    pub fn with_seed(rates: SampleRates, seed: u64) -> Self {
        Self {
            rates,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn rates(&self) -> SampleRates {
        self.rates
    }

    /// Draw a mode for a brand-new session. Each call is an independent draw.
    pub fn sample(&mut self) -> ReplayMode {
        let mode = if self.rng.gen_bool(self.rates.session_sample_rate) {
            ReplayMode::Continuous
        } else if self.rng.gen_bool(self.rates.error_sample_rate) {
            ReplayMode::Buffering
        } else {
            ReplayMode::Off
        };
        debug!(
            "Sampled session mode '{}' (session rate {}, error rate {})",
            mode, self.rates.session_sample_rate, self.rates.error_sample_rate
        );
        mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_rate() {
        assert_eq!(clamp_rate("r", 0.25), 0.25);
        assert_eq!(clamp_rate("r", 2.0), 1.0);
        assert_eq!(clamp_rate("r", -1.0), 0.0);
        assert_eq!(clamp_rate("r", f64::NAN), 0.0);
    }

    #[test]
    fn test_zero_rates_always_off() {
        let mut sampler = Sampler::with_seed(SampleRates::new(0.0, 0.0), 7);
        for _ in 0..1000 {
            assert_eq!(sampler.sample(), ReplayMode::Off);
        }
    }

    #[test]
    fn test_error_only_always_buffers() {
        let mut sampler = Sampler::with_seed(SampleRates::new(0.0, 1.0), 7);
        for _ in 0..1000 {
            assert_eq!(sampler.sample(), ReplayMode::Buffering);
        }
    }
}
