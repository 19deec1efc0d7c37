//! Maps a sparse tracking stream onto the (denser) frame timestamps.

use crate::enums::TemporalInterpolation;
use crate::error::{TrackingGapReason, TrackingGapWarning};
use crate::interpolator::Interpolator;
use crate::transform::{RigidTransform, TimestampedTransform};

/// Pose assigned to one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResampledPose {
    pub transform: RigidTransform,
    /// False when the pose was clamped or bridged a tracking gap; such frames
    /// must not contribute to the reconstruction.
    pub valid: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ResampleResult {
    pub poses: Vec<ResampledPose>,
    pub warnings: Vec<TrackingGapWarning>,
}

impl ResampleResult {
    pub fn valid_count(&self) -> usize {
        self.poses.iter().filter(|p| p.valid).count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoseResampler {
    policy: TemporalInterpolation,
    max_gap: Option<f64>,
}

impl PoseResampler {
    /// `max_gap` is the largest allowed distance in seconds between the two
    /// tracking samples around a frame; `None` accepts any gap.
    pub fn new(policy: TemporalInterpolation, max_gap: Option<f64>) -> Self {
        Self { policy, max_gap }
    }

    /// Produce one pose per frame timestamp.
    ///
    /// `samples` must be sorted by timestamp. Frame timestamps may come in any
    /// order; the output follows their order.
    pub fn resample(&self, samples: &[TimestampedTransform], frame_timestamps: &[f64]) -> ResampleResult {
        let mut result = ResampleResult {
            poses: Vec::with_capacity(frame_timestamps.len()),
            warnings: Vec::new(),
        };

        for (frame_index, &timestamp) in frame_timestamps.iter().enumerate() {
            match self.resample_one(samples, timestamp) {
                Ok(transform) => result.poses.push(ResampledPose {
                    transform,
                    valid: true,
                }),
                Err((transform, reason)) => {
                    result.poses.push(ResampledPose {
                        transform,
                        valid: false,
                    });
                    result.warnings.push(TrackingGapWarning {
                        frame_index,
                        timestamp,
                        reason,
                    });
                }
            }
        }

        result
    }

    fn resample_one(
        &self,
        samples: &[TimestampedTransform],
        timestamp: f64,
    ) -> Result<RigidTransform, (RigidTransform, TrackingGapReason)> {
        let Some(first) = samples.first() else {
            return Err((
                RigidTransform::identity(),
                TrackingGapReason::OutsideTrackingRange,
            ));
        };

        // Index of the first sample strictly after the frame.
        let next = samples.partition_point(|s| s.timestamp <= timestamp);
        if next == 0 {
            return Err((first.transform, TrackingGapReason::OutsideTrackingRange));
        }

        let prev = &samples[next - 1];
        if prev.timestamp == timestamp {
            return Ok(prev.transform);
        }
        if next == samples.len() {
            return Err((prev.transform, TrackingGapReason::OutsideTrackingRange));
        }

        let after = &samples[next];
        let gap = after.timestamp - prev.timestamp;
        let transform = match self.policy {
            TemporalInterpolation::ClosestPoint => {
                if timestamp - prev.timestamp <= after.timestamp - timestamp {
                    prev.transform
                } else {
                    after.transform
                }
            }
            TemporalInterpolation::Linear => {
                let t = (timestamp - prev.timestamp) / gap;
                Interpolator::interpolate(&prev.transform, &after.transform, t)
            }
        };

        match self.max_gap {
            Some(max_gap) if gap > max_gap => {
                Err((transform, TrackingGapReason::GapTooLarge { gap }))
            }
            _ => Ok(transform),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn track(points: &[(f64, f64)]) -> Vec<TimestampedTransform> {
        points
            .iter()
            .map(|&(ts, x)| TimestampedTransform::new(ts, RigidTransform::from_translation(x, 0.0, 0.0)))
            .collect()
    }

    #[test]
    fn exact_timestamp_returns_sample_unchanged() {
        let mut samples = track(&[(0.0, 0.0), (1.0, 10.0), (2.0, 20.0)]);
        samples[1].transform =
            RigidTransform::from_axis_angle(Vector3::new(0.3, 1.0, 0.2), 0.77, Vector3::new(1.5, 2.5, 3.5));
        for policy in [TemporalInterpolation::Linear, TemporalInterpolation::ClosestPoint] {
            let result = PoseResampler::new(policy, None).resample(&samples, &[1.0]);
            assert!(result.poses[0].valid);
            assert_eq!(result.poses[0].transform, samples[1].transform);
        }
    }

    #[test]
    fn linear_interpolates_between_brackets() {
        let samples = track(&[(0.0, 0.0), (1.0, 10.0)]);
        let result = PoseResampler::new(TemporalInterpolation::Linear, None).resample(&samples, &[0.25]);
        assert!(result.poses[0].valid);
        assert_relative_eq!(result.poses[0].transform.translation().x, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn closest_point_prefers_earlier_sample_on_tie() {
        let samples = track(&[(0.0, 0.0), (1.0, 10.0)]);
        let resampler = PoseResampler::new(TemporalInterpolation::ClosestPoint, None);
        let result = resampler.resample(&samples, &[0.5, 0.6, 0.4]);
        assert_eq!(result.poses[0].transform.translation().x, 0.0);
        assert_eq!(result.poses[1].transform.translation().x, 10.0);
        assert_eq!(result.poses[2].transform.translation().x, 0.0);
    }

    #[test]
    fn frames_outside_tracking_range_are_invalid_and_clamped() {
        let samples = track(&[(1.0, 10.0), (2.0, 20.0)]);
        let result = PoseResampler::new(TemporalInterpolation::Linear, None).resample(&samples, &[0.5, 1.5, 2.5]);

        assert!(!result.poses[0].valid);
        assert_eq!(result.poses[0].transform.translation().x, 10.0);
        assert!(result.poses[1].valid);
        assert!(!result.poses[2].valid);
        assert_eq!(result.poses[2].transform.translation().x, 20.0);

        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.warnings[0].frame_index, 0);
        assert_eq!(result.warnings[0].reason, TrackingGapReason::OutsideTrackingRange);
        assert_eq!(result.warnings[1].frame_index, 2);
        assert_eq!(result.valid_count(), 1);
    }

    #[test]
    fn large_gaps_invalidate_bracketed_frames() {
        let samples = track(&[(0.0, 0.0), (0.1, 1.0), (1.1, 11.0)]);
        let result = PoseResampler::new(TemporalInterpolation::Linear, Some(0.5)).resample(&samples, &[0.05, 0.6]);

        assert!(result.poses[0].valid);
        assert!(!result.poses[1].valid);
        match result.warnings[0].reason {
            TrackingGapReason::GapTooLarge { gap } => assert_relative_eq!(gap, 1.0, epsilon = 1e-12),
            other => panic!("unexpected reason {other:?}"),
        }
    }

    #[test]
    fn exact_hit_inside_large_gap_is_still_valid() {
        let samples = track(&[(0.0, 0.0), (5.0, 50.0)]);
        let result = PoseResampler::new(TemporalInterpolation::Linear, Some(0.1)).resample(&samples, &[0.0, 5.0]);
        assert!(result.poses.iter().all(|p| p.valid));
    }

    #[test]
    fn duplicate_sample_timestamps_use_the_last_one() {
        let samples = track(&[(0.0, 0.0), (1.0, 5.0), (1.0, 6.0), (2.0, 8.0)]);
        let result = PoseResampler::new(TemporalInterpolation::Linear, None).resample(&samples, &[1.0, 1.5]);
        assert_eq!(result.poses[0].transform.translation().x, 6.0);
        assert_relative_eq!(result.poses[1].transform.translation().x, 7.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_tracking_invalidates_everything() {
        let result = PoseResampler::new(TemporalInterpolation::Linear, None).resample(&[], &[0.0, 1.0]);
        assert_eq!(result.valid_count(), 0);
        assert_eq!(result.warnings.len(), 2);
    }
}
