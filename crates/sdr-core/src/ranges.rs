//! Numeric ranges for gains, frequencies, bandwidths and sample rates.
//!
//! A [`Range`] is a `(start, stop, step)` triple; `step == 0` means continuous.
//! A [`MetaRange`] is an ordered list of ranges and is what backends report:
//! a tuner gain table is a meta-range of single points, a PGA is one stepped
//! range, a list of sample rates is a handful of points.

use serde::{Deserialize, Serialize};
use std::fmt;

const EPSILON: f64 = 1e-9;

/// A single `(start, stop, step)` range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    /// Lowest value.
    pub start: f64,
    /// Highest value.
    pub stop: f64,
    /// Grid step; `0.0` for continuous ranges.
    pub step: f64,
}

impl Range {
    /// Create a range.
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }

    /// Continuous range.
    pub fn continuous(start: f64, stop: f64) -> Self {
        Self::new(start, stop, 0.0)
    }

    /// A single value.
    pub fn point(value: f64) -> Self {
        Self::new(value, value, 0.0)
    }

    fn contains(&self, value: f64) -> bool {
        value >= self.start - EPSILON && value <= self.stop + EPSILON
    }

    fn snap(&self, value: f64) -> f64 {
        if self.step <= 0.0 {
            return value;
        }
        let steps = ((value - self.start) / self.step).round();
        (self.start + steps * self.step).clamp(self.start, self.stop)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.start, self.stop, self.step)
    }
}

/// Ordered collection of ranges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaRange {
    ranges: Vec<Range>,
}

/// Gain range of one stage, in dB.
pub type GainRange = MetaRange;

/// Frequency range, in Hz.
pub type FreqRange = MetaRange;

impl MetaRange {
    /// Empty meta-range.
    pub fn new() -> Self {
        Self::default()
    }

    /// Meta-range made of one range.
    pub fn single(start: f64, stop: f64, step: f64) -> Self {
        Self {
            ranges: vec![Range::new(start, stop, step)],
        }
    }

    /// Meta-range of discrete points (sorted ascending).
    pub fn discrete(values: &[f64]) -> Self {
        let mut points: Vec<f64> = values.to_vec();
        points.sort_by(|a, b| a.total_cmp(b));
        Self {
            ranges: points.into_iter().map(Range::point).collect(),
        }
    }

    /// Append a range.
    pub fn push(&mut self, range: Range) {
        self.ranges.push(range);
    }

    /// Whether there are no ranges.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Iterate ranges in order.
    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.ranges.iter()
    }

    /// Overall minimum (0 when empty).
    pub fn start(&self) -> f64 {
        self.ranges
            .iter()
            .map(|r| r.start)
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    /// Overall maximum (0 when empty).
    pub fn stop(&self) -> f64 {
        self.ranges
            .iter()
            .map(|r| r.stop)
            .reduce(f64::max)
            .unwrap_or(0.0)
    }

    /// Smallest non-zero spacing between adjacent valid values.
    ///
    /// Considers both the ranges' own steps and the gaps between consecutive
    /// ranges. Returns 0 for continuous or empty meta-ranges.
    pub fn step(&self) -> f64 {
        let steps = self.ranges.iter().map(|r| r.step).filter(|s| *s > 0.0);
        let gaps = self
            .ranges
            .windows(2)
            .map(|w| w[1].start - w[0].stop)
            .filter(|g| *g > EPSILON);
        steps.chain(gaps).reduce(f64::min).unwrap_or(0.0)
    }

    /// Whether the meta-range offers more than one value.
    pub fn is_configurable(&self) -> bool {
        !self.is_empty() && self.stop() > self.start()
    }

    /// Whether `value` lies inside one of the ranges.
    pub fn contains(&self, value: f64) -> bool {
        self.ranges.iter().any(|r| r.contains(value))
    }

    /// Clamp `value` to the closest covered value.
    ///
    /// Values in a gap between two ranges go to the nearer edge. With
    /// `clip_step` the result is additionally snapped onto the step grid of the
    /// range it falls into. An empty meta-range returns `value` unchanged.
    pub fn clip(&self, value: f64, clip_step: bool) -> f64 {
        let Some(first) = self.ranges.first() else {
            return value;
        };
        if value < first.start {
            return first.start;
        }
        let mut last_stop = first.stop;
        for r in &self.ranges {
            if value < r.start {
                return if r.start - value < value - last_stop {
                    r.start
                } else {
                    last_stop
                };
            }
            if r.contains(value) {
                let v = value.clamp(r.start, r.stop);
                return if clip_step { r.snap(v) } else { v };
            }
            last_stop = r.stop;
        }
        last_stop
    }

    /// Enumerate the discrete values.
    ///
    /// Stepped ranges expand onto their grid; continuous ranges contribute
    /// their two endpoints.
    pub fn values(&self) -> Vec<f64> {
        let mut out = Vec::new();
        for r in &self.ranges {
            if r.step > 0.0 {
                let count = ((r.stop - r.start) / r.step + EPSILON).floor() as usize;
                out.extend((0..=count).map(|i| r.start + i as f64 * r.step));
            } else if r.stop > r.start {
                out.push(r.start);
                out.push(r.stop);
            } else {
                out.push(r.start);
            }
        }
        out
    }

    /// One range per line.
    pub fn to_pp_string(&self) -> String {
        self.ranges
            .iter()
            .map(|r| format!("{}\n", r))
            .collect()
    }
}

impl From<Range> for MetaRange {
    fn from(range: Range) -> Self {
        Self {
            ranges: vec![range],
        }
    }
}

impl FromIterator<Range> for MetaRange {
    fn from_iter<I: IntoIterator<Item = Range>>(iter: I) -> Self {
        Self {
            ranges: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for MetaRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("[]");
        }
        write!(f, "[{}, {}]", self.start(), self.stop())?;
        let step = self.step();
        if step > 0.0 {
            write!(f, " step {}", step)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_range_bounds_and_clip() {
        let r = MetaRange::single(0.0, 31.5, 0.5);
        assert_eq!(r.start(), 0.0);
        assert_eq!(r.stop(), 31.5);
        assert_eq!(r.step(), 0.5);
        assert_eq!(r.clip(-3.0, false), 0.0);
        assert_eq!(r.clip(40.0, false), 31.5);
        assert_eq!(r.clip(10.3, false), 10.3);
        assert_eq!(r.clip(10.3, true), 10.5);
    }

    #[test]
    fn discrete_table_clips_to_nearest_entry() {
        let table = MetaRange::discrete(&[0.0, 0.9, 1.4, 2.7, 3.7]);
        assert_eq!(table.clip(1.0, false), 0.9);
        assert_eq!(table.clip(1.3, false), 1.4);
        assert_eq!(table.clip(9.0, false), 3.7);
        assert_eq!(table.clip(-1.0, false), 0.0);
        assert!((table.step() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_and_degenerate_ranges_are_not_configurable() {
        assert!(!MetaRange::new().is_configurable());
        assert!(!MetaRange::single(0.0, 0.0, 0.0).is_configurable());
        assert!(!MetaRange::single(5.0, 2.0, 1.0).is_configurable());
        assert!(MetaRange::single(0.0, 1.0, 0.0).is_configurable());
        assert_eq!(MetaRange::new().clip(4.2, true), 4.2);
    }

    #[test]
    fn values_expand_steps() {
        let r = MetaRange::single(0.0, 14.0, 14.0);
        assert_eq!(r.values(), vec![0.0, 14.0]);
        let r = MetaRange::single(0.0, 40.0, 8.0);
        assert_eq!(r.values().len(), 6);
        let rates = MetaRange::discrete(&[10e6, 8e6]);
        assert_eq!(rates.values(), vec![8e6, 10e6]);
    }

    #[test]
    fn pretty_print_and_display() {
        let r = MetaRange::single(0.0, 62.0, 2.0);
        assert_eq!(r.to_pp_string(), "(0, 62, 2)\n");
        assert_eq!(r.to_string(), "[0, 62] step 2");
        assert_eq!(MetaRange::new().to_string(), "[]");
    }

    #[test]
    fn serializes_transparently() {
        let r = MetaRange::single(1.0, 2.0, 0.0);
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"[{"start":1.0,"stop":2.0,"step":0.0}]"#);
    }
}
