pub use std::time::Instant;

/// Timing handed to `update` and `render` every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameInfo {
    /// Seconds since the previous frame.
    pub frame_delta: f32,
    /// Seconds since startup.
    pub elapsed: f32,
    pub frame_index: u64,
}

/// Produces a [`FrameInfo`] per tick from wall-clock time.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last: Instant,
    frame_index: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            frame_index: 0,
        }
    }

    pub fn tick(&mut self) -> FrameInfo {
        let now = Instant::now();
        let info = FrameInfo {
            frame_delta: (now - self.last).as_secs_f32(),
            elapsed: (now - self.start).as_secs_f32(),
            frame_index: self.frame_index,
        };
        self.last = now;
        self.frame_index += 1;
        info
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_counts_frames() {
        let mut clock = FrameClock::new();
        let first = clock.tick();
        let second = clock.tick();
        assert_eq!((first.frame_index, second.frame_index), (0, 1));
        assert!(second.elapsed >= first.elapsed);
        assert!(second.frame_delta >= 0.0);
    }
}
