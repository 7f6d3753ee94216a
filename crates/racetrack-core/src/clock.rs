use crate::config::SimulationConfig;

/// Timing knobs for [`Clock`], in simulation seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSettings {
    pub max_update_window: f64,
    pub max_tick: f64,
    pub render_interval: f64,
    /// 0 disables periodic saves.
    pub save_interval: f64,
}

impl ClockSettings {
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            max_update_window: config.max_update_window,
            max_tick: config.max_tick,
            render_interval: config.render_interval,
            save_interval: config.save_interval,
        }
    }
}

/// Work produced by one [`Clock::advance`] call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClockFrame {
    /// Simulation time when the frame began.
    pub start: f64,
    /// Sub-step lengths, each at most `max_tick`, summing to `consumed`.
    pub steps: Vec<f64>,
    pub consumed: f64,
    /// Time discarded by the update-window clamp.
    pub dropped: f64,
    pub render_due: bool,
    pub save_due: bool,
}

impl ClockFrame {
    /// Simulation time once the frame has run.
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.consumed
    }

    /// Yields `(dt, time_after_step)` for each sub-step.
    pub fn sub_steps(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        let mut now = self.start;
        self.steps.iter().map(move |&dt| {
            now += dt;
            (dt, now)
        })
    }
}

/// Fixed-step accumulator with throttled render/save callbacks.
#[derive(Debug, Clone)]
pub struct Clock {
    settings: ClockSettings,
    now: f64,
    last_render: f64,
    last_save: f64,
}

const STEP_EPSILON: f64 = 1e-9;

impl Clock {
    #[must_use]
    pub fn new(settings: ClockSettings) -> Self {
        Self {
            settings,
            now: 0.0,
            last_render: 0.0,
            last_save: 0.0,
        }
    }

    /// Current simulation time in seconds.
    #[must_use]
    pub const fn now(&self) -> f64 {
        self.now
    }

    #[must_use]
    pub const fn settings(&self) -> &ClockSettings {
        &self.settings
    }

    /// Consume a wall-clock `delta`, clamped to the update window and split into sub-steps.
    pub fn advance(&mut self, delta: f64) -> ClockFrame {
        let delta = if delta.is_finite() && delta > 0.0 {
            delta
        } else {
            0.0
        };
        let consumed = delta.min(self.settings.max_update_window);
        let mut steps = Vec::new();
        let mut remaining = consumed;
        while remaining > STEP_EPSILON {
            let step = remaining.min(self.settings.max_tick);
            steps.push(step);
            remaining -= step;
        }

        let start = self.now;
        self.now += consumed;

        let render_due = self.now - self.last_render >= self.settings.render_interval;
        if render_due {
            self.last_render = self.now;
        }
        let save_due = self.settings.save_interval > 0.0
            && self.now - self.last_save >= self.settings.save_interval;
        if save_due {
            self.last_save = self.now;
        }

        ClockFrame {
            start,
            steps,
            consumed,
            dropped: delta - consumed,
            render_due,
            save_due,
        }
    }
}
