//! Animation clips and their playback clock.

use std::sync::Arc;

use crate::channel::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    /// Wrap around at either end of the time domain.
    #[default]
    Loop,
    /// Bounce between the ends, flipping the playback direction.
    Reverse,
    /// Play to an end, then switch to [`PlaybackMode::Stop`].
    Once,
    /// Frozen; updates return the held time.
    Stop,
}

/// A set of channels sharing one playback clock.
#[derive(Debug, Clone)]
pub struct Animation {
    pub name: String,
    start: f32,
    stop: f32,
    mode: PlaybackMode,
    scale: f32,
    current_time: f32,
    channels: Vec<Arc<Channel>>,
}

impl Animation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: 0.0,
            stop: 0.0,
            mode: PlaybackMode::Loop,
            scale: 1.0,
            current_time: 0.0,
            channels: Vec::new(),
        }
    }

    /// Animation over `channels` whose time domain is the union of their key
    /// ranges.
    pub fn with_channels(name: impl Into<String>, channels: Vec<Arc<Channel>>) -> Self {
        let mut animation = Self::new(name);
        animation.channels = channels;
        animation.fit_time_domain();
        animation
    }

    /// Append a channel and widen the time domain to cover it.
    pub fn add_channel(&mut self, channel: Arc<Channel>) {
        self.channels.push(channel);
        self.fit_time_domain();
    }

    fn fit_time_domain(&mut self) {
        let mut range: Option<(f32, f32)> = None;
        for channel in &self.channels {
            if let (Some(first), Some(last)) = (channel.start_time(), channel.stop_time()) {
                range = Some(match range {
                    Some((start, stop)) => (start.min(first), stop.max(last)),
                    None => (first, last),
                });
            }
        }
        if let Some((start, stop)) = range {
            self.start = start;
            self.stop = stop;
            self.current_time = self.current_time.clamp(start, stop);
        }
    }

    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn start(&self) -> f32 {
        self.start
    }

    pub fn stop(&self) -> f32 {
        self.stop
    }

    pub fn set_time_domain(&mut self, start: f32, stop: f32) {
        self.start = start.min(stop);
        self.stop = stop.max(start);
        self.current_time = self.current_time.clamp(self.start, self.stop);
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PlaybackMode) {
        self.mode = mode;
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    pub fn current_time(&self) -> f32 {
        self.current_time
    }

    /// Move the playhead, clamped to the time domain.
    pub fn set_current_time(&mut self, time: f32) {
        self.current_time = time.clamp(self.start, self.stop);
    }

    /// Advance the clock by `delta_time * scale` and return the new time.
    pub fn update(&mut self, delta_time: f32) -> f32 {
        if self.mode == PlaybackMode::Stop {
            return self.current_time;
        }

        let time = self.current_time + self.scale * delta_time;
        let duration = self.stop - self.start;

        if time >= self.start && time <= self.stop {
            self.current_time = time;
            return time;
        }

        self.current_time = match self.mode {
            _ if duration <= 0.0 => {
                if self.mode == PlaybackMode::Once {
                    self.mode = PlaybackMode::Stop;
                }
                self.start
            }
            PlaybackMode::Loop if time < self.start => {
                self.stop - (self.start - time).rem_euclid(duration)
            }
            PlaybackMode::Loop => self.start + (time - self.stop).rem_euclid(duration),
            PlaybackMode::Reverse => self.reflect(time, duration),
            PlaybackMode::Once => {
                self.mode = PlaybackMode::Stop;
                if time < self.start { self.start } else { self.stop }
            }
            PlaybackMode::Stop => self.current_time,
        };
        self.current_time
    }

    /// Fold `time` back into the domain, negating the scale once per
    /// boundary crossed.
    fn reflect(&mut self, time: f32, duration: f32) -> f32 {
        let offset = time - self.start;
        let period = 2.0 * duration;
        let crossings = if offset > duration {
            (offset / duration).floor() as i64
        } else {
            (-offset / duration).floor() as i64 + 1
        };
        if crossings % 2 == 1 {
            self.scale = -self.scale;
        }

        let folded = offset.rem_euclid(period);
        if folded <= duration {
            self.start + folded
        } else {
            self.start + period - folded
        }
    }

    /// Copy with `_clone` appended to the name. Channels are shared.
    pub fn clone_named(&self) -> Self {
        let mut clone = self.clone();
        clone.name = format!("{}_clone", self.name);
        clone
    }
}
