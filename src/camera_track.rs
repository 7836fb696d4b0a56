//! Scripted fly-through: eased keyframes plus timed actions.

use glam::{Quat, Vec3};

use crate::scene::camera::yaw_pitch;

const MAX_PITCH: f32 = 89.9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub position: Vec3,
    pub orientation: Quat,
}

/// What a track effect does to the renderer when it fires.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrackAction {
    /// Eases the right view's width share from `from` to `to` over the span.
    SetSplitRatio { from: f32, to: f32 },
    SetBloom(bool),
    SetGizmos(bool),
    /// Toggles one optional post effect, indexed in chain order.
    SetPostEffect { index: usize, enabled: bool },
    SetFrame { view: usize, node: usize, frame: i32 },
}

impl TrackAction {
    /// Split ratio for an effect `local_time` seconds into a span of
    /// `duration` seconds.
    pub fn split_ratio_at(from: f32, to: f32, local_time: f32, duration: f32) -> f32 {
        let t = if duration > 0.0 {
            (local_time / duration).clamp(0.0, 1.0)
        } else {
            1.0
        };
        from + (to - from) * ease_in_out_cubic(t)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackEffect {
    pub start: f32,
    pub end: f32,
    pub action: TrackAction,
    triggered: bool,
}

impl TrackEffect {
    pub fn new(start: f32, end: f32, action: TrackAction) -> Self {
        Self {
            start,
            end: end.max(start),
            action,
            triggered: false,
        }
    }

    pub fn duration(&self) -> f32 {
        self.end - self.start
    }
}

/// An action fired this frame with the seconds elapsed since its start.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FiredAction {
    pub action: TrackAction,
    pub local_time: f32,
    pub duration: f32,
}

pub fn ease_in_out_cubic(t: f32) -> f32 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

#[derive(Clone, Debug, Default)]
pub struct CameraTrack {
    keyframes: Vec<Keyframe>,
    effects: Vec<TrackEffect>,
    time: f32,
}

impl CameraTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a keyframe after every keyframe at or before `time`. Angles
    /// are in degrees.
    pub fn add_keyframe(&mut self, time: f32, position: Vec3, pitch_deg: f32, yaw_deg: f32) {
        let pitch = pitch_deg.clamp(-MAX_PITCH, MAX_PITCH);
        let yaw = yaw_deg.rem_euclid(360.0);
        let orientation = yaw_pitch(yaw, pitch);
        let index = self.keyframes.partition_point(|kf| kf.time <= time);
        self.keyframes.insert(
            index,
            Keyframe {
                time,
                position,
                orientation,
            },
        );
    }

    pub fn add_effect(&mut self, effect: TrackEffect) {
        self.effects.push(effect);
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Advances the track and returns the actions fired this frame. Past the
    /// last keyframe the track restarts and every effect re-arms.
    pub fn update(&mut self, dt: f32) -> Vec<FiredAction> {
        self.time += dt;
        let end = self.keyframes.last().map_or(0.0, |kf| kf.time);
        if self.time > end {
            self.time = 0.0;
            for effect in &mut self.effects {
                effect.triggered = false;
            }
        }

        let mut fired = Vec::new();
        for effect in &mut self.effects {
            if effect.triggered || effect.start > self.time {
                continue;
            }
            fired.push(FiredAction {
                action: effect.action,
                local_time: self.time - effect.start,
                duration: effect.duration(),
            });
            if effect.end <= self.time {
                effect.triggered = true;
            }
        }
        fired
    }

    /// Neighbouring keyframes around the current time and the eased blend
    /// factor between them.
    fn segment(&self) -> Option<(&Keyframe, &Keyframe, f32)> {
        let first = self.keyframes.first()?;
        let last = self.keyframes.last()?;
        if self.time <= first.time {
            return Some((first, first, 0.0));
        }
        if self.time >= last.time {
            return Some((last, last, 0.0));
        }
        self.keyframes.windows(2).find_map(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            if self.time < a.time || self.time > b.time {
                return None;
            }
            let span = b.time - a.time;
            let t = if span > 0.0 { (self.time - a.time) / span } else { 1.0 };
            Some((a, b, ease_in_out_cubic(t)))
        })
    }

    pub fn position(&self) -> Vec3 {
        match self.segment() {
            Some((a, b, t)) => a.position.lerp(b.position, t),
            None => Vec3::ZERO,
        }
    }

    pub fn rotation(&self) -> Quat {
        match self.segment() {
            Some((a, b, t)) => a.orientation.slerp(b.orientation, t),
            None => Quat::IDENTITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn two_point_track() -> CameraTrack {
        let mut track = CameraTrack::new();
        track.add_keyframe(10.0, Vec3::new(10.0, 0.0, 0.0), 0.0, 90.0);
        track.add_keyframe(0.0, Vec3::ZERO, 0.0, 0.0);
        track
    }

    #[test]
    fn keyframes_stay_sorted() {
        let track = two_point_track();
        let times: Vec<_> = track.keyframes().iter().map(|kf| kf.time).collect();
        assert_eq!(times, vec![0.0, 10.0]);
    }

    #[test]
    fn pitch_is_clamped_and_yaw_wrapped() {
        let mut a = CameraTrack::new();
        a.add_keyframe(0.0, Vec3::ZERO, 120.0, -90.0);
        let mut b = CameraTrack::new();
        b.add_keyframe(0.0, Vec3::ZERO, MAX_PITCH, 270.0);
        assert!(a.rotation().abs_diff_eq(b.rotation(), EPSILON));
    }

    #[test]
    fn midpoint_is_halfway_after_easing() {
        let mut track = two_point_track();
        track.update(5.0);
        assert!((track.position().x - 5.0).abs() < EPSILON);
        track.update(2.5);
        // 1 - (0.5)^3 / 2
        assert!((track.position().x - 10.0 * 0.9375).abs() < EPSILON);
    }

    #[test]
    fn ends_clamp_to_first_and_last_keyframe() {
        let mut track = two_point_track();
        assert_eq!(track.position(), Vec3::ZERO);
        track.update(10.0);
        assert!((track.position().x - 10.0).abs() < EPSILON);
    }

    #[test]
    fn effects_fire_over_their_span_and_rearm_on_loop() {
        let mut track = two_point_track();
        track.add_effect(TrackEffect::new(2.0, 4.0, TrackAction::SetBloom(false)));

        assert!(track.update(1.0).is_empty());
        let fired = track.update(2.0);
        assert_eq!(fired.len(), 1);
        assert!((fired[0].local_time - 1.0).abs() < EPSILON);
        assert_eq!(track.update(1.5).len(), 1);
        assert!(track.update(1.0).is_empty());

        // Wraps past the last keyframe.
        track.update(10.0);
        assert_eq!(track.time(), 0.0);
        assert_eq!(track.update(2.0).len(), 1);
    }

    #[test]
    fn instant_effect_fires_once() {
        let mut track = two_point_track();
        track.add_effect(TrackEffect::new(1.0, 1.0, TrackAction::SetGizmos(true)));
        assert_eq!(track.update(1.5).len(), 1);
        assert!(track.update(0.5).is_empty());
    }

    #[test]
    fn split_ratio_eases_between_bounds() {
        assert_eq!(TrackAction::split_ratio_at(0.0, 0.5, 0.0, 0.5), 0.0);
        assert!((TrackAction::split_ratio_at(0.0, 0.5, 0.25, 0.5) - 0.25).abs() < EPSILON);
        assert_eq!(TrackAction::split_ratio_at(0.0, 0.5, 1.0, 0.5), 0.5);
        assert_eq!(TrackAction::split_ratio_at(0.5, 1.0, 0.0, 0.0), 1.0);
    }
}
