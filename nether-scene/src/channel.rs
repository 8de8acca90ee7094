//! Animation channels: one animated scalar of a node transform.

use thiserror::Error;

/// Transform component a channel drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelTarget {
    Translate,
    /// Quaternion component, element 0..4 is x, y, z, w.
    Rotate,
    Scale,
    /// Euler angle in radians, element 0..3 is x, y, z.
    EulerRotate,
}

impl ChannelTarget {
    pub const fn element_count(self) -> usize {
        match self {
            Self::Rotate => 4,
            Self::Translate | Self::Scale | Self::EulerRotate => 3,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Translate => "translation",
            Self::Rotate => "rotation",
            Self::Scale => "scale",
            Self::EulerRotate => "euler",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpolator {
    Constant,
    Linear,
    CatmullRom,
    CubicSpline,
}

/// One key. Tangents are in value units per second and only used by the
/// spline interpolators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
    pub in_tangent: f32,
    pub out_tangent: f32,
}

impl Keyframe {
    pub const fn new(time: f32, value: f32) -> Self {
        Self {
            time,
            value,
            in_tangent: 0.0,
            out_tangent: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("key {index} at time {time} does not follow previous key at {previous}")]
    NonMonotonicKeys {
        index: usize,
        previous: f32,
        time: f32,
    },

    #[error("key {index} has non-finite time")]
    NonFiniteTime { index: usize },

    #[error("element {element} out of range for {target:?}")]
    ElementOutOfRange {
        target: ChannelTarget,
        element: usize,
    },

    #[error("{times} key times but {values} values")]
    SampleCountMismatch { times: usize, values: usize },
}

/// Position of a query time relative to a channel's keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bracket {
    Empty,
    /// At or before the first key.
    Before,
    /// At or after the last key.
    After,
    /// `keys[index].time <= time < keys[index + 1].time`, `t` in [0, 1].
    Between { index: usize, t: f32 },
}

/// Keyframed animation of one transform element.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub name: String,
    target: ChannelTarget,
    element: usize,
    interpolator: Interpolator,
    keys: Vec<Keyframe>,
}

impl Channel {
    /// Build a channel from explicit keys. Key times must be finite and
    /// strictly increasing.
    pub fn new(
        name: impl Into<String>,
        target: ChannelTarget,
        element: usize,
        interpolator: Interpolator,
        keys: Vec<Keyframe>,
    ) -> Result<Self, ChannelError> {
        if element >= target.element_count() {
            return Err(ChannelError::ElementOutOfRange { target, element });
        }
        validate_times(&keys)?;

        let mut channel = Self {
            name: name.into(),
            target,
            element,
            interpolator,
            keys,
        };
        if interpolator == Interpolator::CatmullRom {
            channel.derive_catmull_rom_tangents();
        }
        Ok(channel)
    }

    /// Build a channel from parallel time and value samples.
    pub fn from_samples(
        name: impl Into<String>,
        target: ChannelTarget,
        element: usize,
        interpolator: Interpolator,
        times: &[f32],
        values: &[f32],
    ) -> Result<Self, ChannelError> {
        if times.len() != values.len() {
            return Err(ChannelError::SampleCountMismatch {
                times: times.len(),
                values: values.len(),
            });
        }
        let keys = times
            .iter()
            .zip(values)
            .map(|(&time, &value)| Keyframe::new(time, value))
            .collect();
        Self::new(name, target, element, interpolator, keys)
    }

    pub fn target(&self) -> ChannelTarget {
        self.target
    }

    pub fn element(&self) -> usize {
        self.element
    }

    pub fn interpolator(&self) -> Interpolator {
        self.interpolator
    }

    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn start_time(&self) -> Option<f32> {
        self.keys.first().map(|k| k.time)
    }

    pub fn stop_time(&self) -> Option<f32> {
        self.keys.last().map(|k| k.time)
    }

    /// Locate `time` among the keys with a binary search.
    pub fn bracket(&self, time: f32) -> Bracket {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return Bracket::Empty;
        };
        if time <= first.time {
            return Bracket::Before;
        }
        if time >= last.time {
            return Bracket::After;
        }

        // First key strictly after `time`; exists and is > 0 given the checks above
        let upper = self.keys.partition_point(|k| k.time <= time);
        let index = upper - 1;
        let span = self.keys[upper].time - self.keys[index].time;
        let t = if span > 0.0 {
            ((time - self.keys[index].time) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Bracket::Between { index, t }
    }

    /// Value at `time`, clamped to the boundary keys. `None` without keys.
    pub fn evaluate(&self, time: f32) -> Option<f32> {
        match self.bracket(time) {
            Bracket::Empty => None,
            Bracket::Before => self.keys.first().map(|k| k.value),
            Bracket::After => self.keys.last().map(|k| k.value),
            Bracket::Between { index, t } => Some(self.interpolate(index, t)),
        }
    }

    /// Interpolate between `keys[index]` and `keys[index + 1]`.
    pub fn interpolate(&self, index: usize, t: f32) -> f32 {
        let a = self.keys[index];
        let Some(&b) = self.keys.get(index + 1) else {
            return a.value;
        };
        match self.interpolator {
            Interpolator::Constant => a.value,
            Interpolator::Linear => a.value + (b.value - a.value) * t,
            Interpolator::CatmullRom | Interpolator::CubicSpline => {
                hermite(a.value, a.out_tangent, b.value, b.in_tangent, b.time - a.time, t)
            }
        }
    }

    /// Finite-difference tangents through neighbouring keys.
    fn derive_catmull_rom_tangents(&mut self) {
        let n = self.keys.len();
        if n < 2 {
            return;
        }
        for i in 0..n {
            let prev = self.keys[i.saturating_sub(1)];
            let next = self.keys[(i + 1).min(n - 1)];
            let dt = next.time - prev.time;
            let slope = if dt > 0.0 {
                (next.value - prev.value) / dt
            } else {
                0.0
            };
            self.keys[i].in_tangent = slope;
            self.keys[i].out_tangent = slope;
        }
    }
}

fn validate_times(keys: &[Keyframe]) -> Result<(), ChannelError> {
    for (index, key) in keys.iter().enumerate() {
        if !key.time.is_finite() {
            return Err(ChannelError::NonFiniteTime { index });
        }
        if index > 0 && key.time <= keys[index - 1].time {
            return Err(ChannelError::NonMonotonicKeys {
                index,
                previous: keys[index - 1].time,
                time: key.time,
            });
        }
    }
    Ok(())
}

/// Cubic Hermite segment with tangents scaled by the interval length.
fn hermite(p0: f32, m0: f32, p1: f32, m1: f32, span: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    h00 * p0 + h10 * span * m0 + h01 * p1 + h11 * span * m1
}
