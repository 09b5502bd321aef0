//! Fixed-step tick clock in integer milliseconds.
//!
//! Real frame time is fed in with [`TickClock::begin_frame`]; the game loop
//! then drains whole steps with [`TickClock::should_step`] and hands
//! `tick_ms` to every `update(timedelta)` call.

use crate::config::EngineConfig;

#[derive(Debug, Clone)]
pub struct TickClock {
    pub tick_ms: u64,
    pub max_frame_ms: u64,
    accumulator: u64,
    pub total_time: u64,
    pub step_count: u64,
    pub frame_count: u64,
    pub steps_this_frame: u32,
}

impl TickClock {
    pub fn new(tick_ms: u64, max_frame_ms: u64) -> Self {
        Self {
            tick_ms: tick_ms.max(1),
            max_frame_ms,
            accumulator: 0,
            total_time: 0,
            step_count: 0,
            frame_count: 0,
            steps_this_frame: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.tick_ms, config.max_frame_ms)
    }

    pub fn begin_frame(&mut self, real_dt_ms: u64) {
        let mut dt = real_dt_ms;
        // Spiral-of-death cap
        if dt > self.max_frame_ms {
            log::warn!(
                "Frame took {}ms, capping accumulator input to {}ms",
                dt,
                self.max_frame_ms
            );
            dt = self.max_frame_ms;
        }
        self.accumulator += dt;
        self.steps_this_frame = 0;
        self.frame_count += 1;
    }

    pub fn should_step(&mut self) -> bool {
        if self.accumulator >= self.tick_ms {
            self.accumulator -= self.tick_ms;
            self.total_time += self.tick_ms;
            self.step_count += 1;
            self.steps_this_frame += 1;
            true
        } else {
            false
        }
    }

    /// Time banked but not yet consumed by a step.
    pub fn pending_ms(&self) -> u64 {
        self.accumulator
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
