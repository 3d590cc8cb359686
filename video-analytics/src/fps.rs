//! Frame rate accounting over a one-second window.

pub struct FpsCounter {
    frames: u32,
    window_start: std::time::Instant,
    fps: f64,
}

impl FpsCounter {
    pub fn new() -> Self {
        FpsCounter {
            frames: 0,
            window_start: std::time::Instant::now(),
            fps: 0.0,
        }
    }

    /// Count one frame. Returns the new estimate when a window completed.
    pub fn tick(&mut self) -> Option<f64> {
        self.frames += 1;
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames as f64 / elapsed;
            self.frames = 0;
            self.window_start = std::time::Instant::now();
            Some(self.fps)
        } else {
            None
        }
    }

    pub fn current(&self) -> f64 {
        self.fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
