use nalgebra::{Isometry2, Point2, Vector2};

use crate::error::{Error, Result};
use crate::utils::{heading, right_direction};

/// Which continuous-path class connects two stations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneChangeType {
    KeepLane,
    LeftLaneChange,
    RightLaneChange,
}

const ARC_SAMPLES_PER_METRE: f64 = 4.0;
const MIN_ARC_SAMPLES: usize = 32;
const MAX_HEADING_CHANGE: f64 = std::f64::consts::FRAC_PI_2;
const MIN_CHORD_LENGTH: f64 = 1.0;

/// A smooth parametric path between two oriented, curvature-annotated poses:
/// a cubic polynomial per coordinate, parameterized by arc length through a
/// precomputed table.
#[derive(Clone, Debug)]
pub struct ContinuousPath {
    start: (Isometry2<f64>, f64),
    end: (Isometry2<f64>, f64),
    lane_change: LaneChangeType,
    coef_x: [f64; 4],
    coef_y: [f64; 4],
    /// Cumulative arc length at uniform parameter samples.
    arc_lengths: Vec<f64>,
}

impl ContinuousPath {
    pub fn new(
        start: (Isometry2<f64>, f64),
        end: (Isometry2<f64>, f64),
        lane_change: LaneChangeType,
    ) -> Result<Self> {
        let p0 = start.0.translation.vector;
        let p1 = end.0.translation.vector;
        let chord = p1 - p0;
        let chord_length = chord.norm();

        if chord_length < MIN_CHORD_LENGTH {
            return Err(Error::PathSynthesis {
                reason: format!("start and end poses are {chord_length:.2} m apart"),
            });
        }

        let start_heading = heading(&start.0);
        let end_heading = heading(&end.0);
        if chord.dot(&start_heading) <= 0.0 {
            return Err(Error::PathSynthesis {
                reason: "end pose is behind the start pose".to_string(),
            });
        }
        if start_heading.angle(&end_heading) > MAX_HEADING_CHANGE {
            return Err(Error::PathSynthesis {
                reason: "heading change over the path exceeds 90 degrees".to_string(),
            });
        }

        // Hermite tangents scaled by the chord keep the parameter speed
        // roughly uniform over the path.
        let m0 = start_heading * chord_length;
        let m1 = end_heading * chord_length;
        let c = 3.0 * chord - 2.0 * m0 - m1;
        let d = -2.0 * chord + m0 + m1;

        let mut path = Self {
            start,
            end,
            lane_change,
            coef_x: [p0.x, m0.x, c.x, d.x],
            coef_y: [p0.y, m0.y, c.y, d.y],
            arc_lengths: Vec::new(),
        };
        path.tabulate_arc_lengths(chord_length);
        Ok(path)
    }

    fn tabulate_arc_lengths(&mut self, chord_length: f64) {
        let samples = ((chord_length * ARC_SAMPLES_PER_METRE).ceil() as usize).max(MIN_ARC_SAMPLES);
        let mut arc_lengths = Vec::with_capacity(samples + 1);
        arc_lengths.push(0.0);

        let mut previous = self.position(0.0);
        let mut total = 0.0;
        for i in 1..=samples {
            let u = i as f64 / samples as f64;
            let current = self.position(u);
            total += (current - previous).norm();
            arc_lengths.push(total);
            previous = current;
        }

        self.arc_lengths = arc_lengths;
    }

    fn position(&self, u: f64) -> Point2<f64> {
        let eval = |c: &[f64; 4]| c[0] + u * (c[1] + u * (c[2] + u * c[3]));
        Point2::new(eval(&self.coef_x), eval(&self.coef_y))
    }

    fn derivative(&self, u: f64) -> Vector2<f64> {
        let eval = |c: &[f64; 4]| c[1] + u * (2.0 * c[2] + u * 3.0 * c[3]);
        Vector2::new(eval(&self.coef_x), eval(&self.coef_y))
    }

    fn second_derivative(&self, u: f64) -> Vector2<f64> {
        let eval = |c: &[f64; 4]| 2.0 * c[2] + u * 6.0 * c[3];
        Vector2::new(eval(&self.coef_x), eval(&self.coef_y))
    }

    /// Total arc length of the path.
    pub fn range(&self) -> f64 {
        *self.arc_lengths.last().unwrap_or(&0.0)
    }

    pub fn lane_change_type(&self) -> LaneChangeType {
        self.lane_change
    }

    pub fn start(&self) -> &(Isometry2<f64>, f64) {
        &self.start
    }

    pub fn end(&self) -> &(Isometry2<f64>, f64) {
        &self.end
    }

    fn parameter_at(&self, s: f64) -> f64 {
        let s = s.clamp(0.0, self.range());
        let upper = self.arc_lengths.partition_point(|&length| length < s);
        if upper == 0 {
            return 0.0;
        }
        let segments = (self.arc_lengths.len() - 1) as f64;
        let (s0, s1) = (self.arc_lengths[upper - 1], self.arc_lengths[upper]);
        let fraction = if s1 > s0 { (s - s0) / (s1 - s0) } else { 0.0 };
        ((upper - 1) as f64 + fraction) / segments
    }

    /// Pose at arc length `s` from the path start.
    pub fn transform_at(&self, s: f64) -> Isometry2<f64> {
        let u = self.parameter_at(s);
        let position = self.position(u);
        let tangent = self.derivative(u);
        Isometry2::new(position.coords, tangent.y.atan2(tangent.x))
    }

    /// Path curvature at arc length `s`.
    pub fn curvature_at(&self, s: f64) -> f64 {
        let u = self.parameter_at(s);
        let d1 = self.derivative(u);
        let d2 = self.second_derivative(u);
        let speed_sq = d1.norm_squared();
        if speed_sq < 1e-9 {
            return 0.0;
        }
        (d1.x * d2.y - d1.y * d2.x) / speed_sq.powf(1.5)
    }
}

/// One sample of a discrete path.
#[derive(Clone, Debug)]
pub struct PathSample {
    pub transform: Isometry2<f64>,
    pub curvature: f64,
    /// Signed offset from the owning segment's start lane, positive to the
    /// right of the start heading.
    pub lateral_offset: f64,
}

/// A continuous path sampled at fixed arc-length intervals; segments can be
/// appended to cover a whole root-to-terminal edge sequence.
#[derive(Clone, Debug)]
pub struct DiscretePath {
    samples: Vec<PathSample>,
    resolution: f64,
    range: f64,
}

impl DiscretePath {
    pub fn new(path: &ContinuousPath, resolution: f64) -> Self {
        let mut discrete = Self {
            samples: Vec::new(),
            resolution,
            range: 0.0,
        };
        discrete.push_segment(path, false);
        discrete
    }

    /// Concatenate another segment, dropping its first sample which coincides
    /// with the current terminal pose.
    pub fn append(&mut self, path: &ContinuousPath) {
        self.push_segment(path, true);
    }

    fn push_segment(&mut self, path: &ContinuousPath, skip_first: bool) {
        let start = path.transform_at(0.0);
        let start_location = Point2::from(start.translation.vector);
        let right = right_direction(&start);

        let mut s = if skip_first { self.resolution } else { 0.0 };
        while s < path.range() {
            self.samples.push(Self::sample_at(path, s, &start_location, &right));
            s += self.resolution;
        }
        self.samples
            .push(Self::sample_at(path, path.range(), &start_location, &right));
        self.range += path.range();
    }

    fn sample_at(
        path: &ContinuousPath,
        s: f64,
        start_location: &Point2<f64>,
        right: &Vector2<f64>,
    ) -> PathSample {
        let transform = path.transform_at(s);
        let location = Point2::from(transform.translation.vector);
        PathSample {
            transform,
            curvature: path.curvature_at(s),
            lateral_offset: (location - start_location).dot(right),
        }
    }

    pub fn samples(&self) -> &[PathSample] {
        &self.samples
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Total arc length covered by all appended segments.
    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
