//! Math utilities.
use std::cmp::Ordering;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Standard gravity used to convert between Isp, thrust and mass flow
/// (`m/s^2`).
pub const G0: f64 = 9.81;

pub fn lerp(x: f64, y: f64, t: f64) -> f64 {
    x + t * (y - x)
}

/// Cubic hermite spline, as implemented by Unity's `AnimationCurve`.
///
/// Engines carry one of these as their atmosphere curve, mapping static
/// pressure (atm) to Isp (s).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<CurveKey>", into = "Vec<CurveKey>")]
pub struct H1 {
    frames: Vec<HFrame>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HFrame {
    pub in_tangent: f64,
    pub out_tangent: f64,
    pub time: f64,
    pub value: f64,
    pub auto_tangent: bool,
}

/// Serialized form of a keyframe. Missing tangents are computed from the
/// neighbouring keys.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    pub time: f64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_tangent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_tangent: Option<f64>,
}

impl H1 {
    pub fn new() -> Self {
        Self::default()
    }

    /// A curve that evaluates to `value` everywhere.
    pub fn constant(value: f64) -> Self {
        let mut curve = Self::new();
        curve.add(0.0, value);
        curve
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[HFrame] {
        &self.frames
    }

    pub fn add(&mut self, time: f64, value: f64) {
        let i = self.insert_frame(HFrame {
            in_tangent: 0.0,
            out_tangent: 0.0,
            time,
            value,
            auto_tangent: true,
        });
        self.recompute_tangents(i);
    }

    pub fn add_with_tangents(&mut self, time: f64, value: f64, in_tangent: f64, out_tangent: f64) {
        let i = self.insert_frame(HFrame {
            in_tangent,
            out_tangent,
            time,
            value,
            auto_tangent: false,
        });
        self.recompute_tangents(i);
    }

    fn position(&self, time: f64) -> Result<usize, usize> {
        self.frames
            .binary_search_by_key(&OrderedFloat(time), |frame| OrderedFloat(frame.time))
    }

    fn insert_frame(&mut self, frame: HFrame) -> usize {
        match self.position(frame.time) {
            Ok(i) => {
                self.frames[i] = frame;
                i
            }
            Err(i) => {
                self.frames.insert(i, frame);
                i
            }
        }
    }

    fn recompute_tangents(&mut self, i: usize) {
        self.fix_tangent(i);
        if i > 0 {
            self.fix_tangent(i - 1);
        }
        if i + 1 < self.frames.len() {
            self.fix_tangent(i + 1);
        }
    }

    fn fix_tangent(&mut self, i: usize) {
        if !self.frames[i].auto_tangent {
            return;
        }

        let current = self.frames[i];
        let right = self.frames.get(i + 1).map(|right| {
            (right.value - current.value) / (right.time - current.time)
        });
        let left = i
            .checked_sub(1)
            .map(|l| self.frames[l])
            .map(|left| (current.value - left.value) / (current.time - left.time));

        let slope = match (left, right) {
            (Some(l), Some(r)) => (l + r) / 2.0,
            (Some(s), None) | (None, Some(s)) => s,
            (None, None) => 0.0,
        };

        self.frames[i].in_tangent = slope;
        self.frames[i].out_tangent = slope;
    }

    fn interpolant(a: &HFrame, b: &HFrame, x: f64) -> f64 {
        let (x1, y1, yp1) = (a.time, a.value, a.out_tangent);
        let (x2, y2, yp2) = (b.time, b.value, b.in_tangent);
        let t = (x - x1) / (x2 - x1);
        let t2 = t * t;
        let t3 = t2 * t;
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        h00 * y1 + h10 * (x2 - x1) * yp1 + h01 * y2 + h11 * (x2 - x1) * yp2
    }

    /// Evaluates the curve, clamping to the first and last keys outside
    /// their range. An empty curve evaluates to zero.
    pub fn evaluate(&self, t: f64) -> f64 {
        let (Some(first), Some(last)) = (self.frames.first(), self.frames.last()) else {
            return 0.0;
        };

        if t.partial_cmp(&first.time) != Some(Ordering::Greater) {
            return first.value;
        }
        if t >= last.time {
            return last.value;
        }

        match self.position(t) {
            Ok(i) => self.frames[i].value,
            Err(hi) => Self::interpolant(&self.frames[hi - 1], &self.frames[hi], t),
        }
    }
}

impl FromIterator<(f64, f64)> for H1 {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let mut curve = Self::new();
        for (time, value) in iter {
            curve.add(time, value);
        }
        curve
    }
}

impl From<Vec<CurveKey>> for H1 {
    fn from(keys: Vec<CurveKey>) -> Self {
        let mut curve = Self::new();
        for key in keys {
            match (key.in_tangent, key.out_tangent) {
                (None, None) => curve.add(key.time, key.value),
                (i, o) => {
                    let i = i.or(o).unwrap_or_default();
                    let o = o.unwrap_or(i);
                    curve.add_with_tangents(key.time, key.value, i, o);
                }
            }
        }
        curve
    }
}

impl From<H1> for Vec<CurveKey> {
    fn from(curve: H1) -> Self {
        curve
            .frames
            .into_iter()
            .map(|frame| CurveKey {
                time: frame.time,
                value: frame.value,
                in_tangent: (!frame.auto_tangent).then_some(frame.in_tangent),
                out_tangent: (!frame.auto_tangent).then_some(frame.out_tangent),
            })
            .collect()
    }
}

#[test]
fn curve_clamps_outside_keys() {
    let curve: H1 = [(0.0, 320.0), (1.0, 250.0), (6.0, 0.001)].into_iter().collect();
    assert_eq!(curve.evaluate(-1.0), 320.0);
    assert_eq!(curve.evaluate(0.0), 320.0);
    assert_eq!(curve.evaluate(1.0), 250.0);
    assert_eq!(curve.evaluate(10.0), 0.001);
    assert_eq!(H1::new().evaluate(0.5), 0.0);
}

#[test]
fn curve_interpolates_between_keys() {
    let mut curve = H1::new();
    curve.add_with_tangents(0.0, 320.0, -70.0, -70.0);
    curve.add_with_tangents(1.0, 250.0, -70.0, -70.0);
    // Matching tangents on a straight line reproduce the line.
    assert!((curve.evaluate(0.5) - 285.0).abs() < 1e-9);

    let linear: H1 = [(0.0, 0.0), (2.0, 2.0)].into_iter().collect();
    assert!((linear.evaluate(0.5) - 0.5).abs() < 1e-9);
}
