/// Converts variable frame deltas into a whole number of fixed network ticks.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f64,
    accumulator: f64,
    max_frame: f64,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f64,
            accumulator: 0.0,
            max_frame: 0.25,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Frames longer than `max_frame` seconds are clamped so a stall does
    /// not trigger a burst of catch-up ticks.
    pub fn set_max_frame(&mut self, max_frame: f64) {
        self.max_frame = max_frame.max(self.dt);
    }

    pub fn accumulate(&mut self, delta: f64) {
        self.accumulator += delta.clamp(0.0, self.max_frame);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.dt
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    /// Accumulates `delta` and returns how many ticks are now due.
    pub fn advance(&mut self, delta: f64) -> u32 {
        self.accumulate(delta);
        let mut ticks = 0;
        while self.consume_tick() {
            ticks += 1;
        }
        ticks
    }

    pub fn alpha(&self) -> f64 {
        self.accumulator / self.dt
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}
