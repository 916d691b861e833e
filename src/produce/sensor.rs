// Copyright 2025 jonefeewang@gmail.com
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

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces the payload for each publish cycle.
pub trait PayloadSource: Send {
    fn next_payload(&mut self) -> Bytes;
}

impl<F> PayloadSource for F
where
    F: FnMut() -> Bytes + Send,
{
    fn next_payload(&mut self) -> Bytes {
        self()
    }
}

/// Simulated body temperature sensor.
///
/// Every reading moves by at most `drift` from the previous one; a drift of
/// zero keeps the reading constant.
#[derive(Debug)]
pub struct TemperatureSensor {
    reading: f64,
    drift: f64,
    rng: StdRng,
}

impl TemperatureSensor {
    pub fn new(initial: f64, drift: f64) -> Self {
        Self::with_rng(initial, drift, StdRng::from_entropy())
    }

    pub fn with_seed(initial: f64, drift: f64, seed: u64) -> Self {
        Self::with_rng(initial, drift, StdRng::seed_from_u64(seed))
    }

    fn with_rng(initial: f64, drift: f64, rng: StdRng) -> Self {
        Self {
            reading: initial,
            drift: drift.abs(),
            rng,
        }
    }

    pub fn reading(&self) -> f64 {
        self.reading
    }

    fn update(&mut self) {
        if self.drift > 0.0 {
            self.reading += self.rng.gen_range(-self.drift..=self.drift);
        }
    }
}

impl Default for TemperatureSensor {
    fn default() -> Self {
        Self::new(98.6, 0.0)
    }
}

impl PayloadSource for TemperatureSensor {
    fn next_payload(&mut self) -> Bytes {
        let payload = render_xml(self.reading);
        self.update();
        payload
    }
}

/// `<?xml version="1.0" standalone="yes" ?><temperature>98.600000</temperature>`
pub fn render_xml(reading: f64) -> Bytes {
    Bytes::from(format!(
        "<?xml version=\"1.0\" standalone=\"yes\" ?><temperature>{:.6}</temperature>",
        reading
    ))
}
