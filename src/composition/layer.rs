//! Ink layers and their transport state machine.
//!
//! A recordable layer captures frames from the live feed, plays them back
//! with bounce looping, or passes the live feed through ("thru"). All
//! transport operations are idempotent: a call whose preconditions are
//! unmet is a no-op rather than an error, so UI buttons can be pressed in
//! any order. The operations only mutate state and flags; the compositor
//! consumes them at the next tick.

use super::frames::{FrameId, ReleaseFrames};
use super::params::{percent_to_unit, unit_to_percent, KeyParams};

/// What a layer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Records and plays back captured frames.
    Recordable,
    /// Permanently shows the keyed live feed; rejects transport calls.
    AlwaysLive,
}

/// A single compositing layer.
///
/// Invariants, maintained by the transport operations:
/// - at most one of `recording` / `playing` is true,
/// - `display_live_view` and `playing` are never both true,
/// - `cursor` stays in `0..frames.len()` whenever `playing` and frames
///   are non-empty.
#[derive(Debug)]
pub struct Layer {
    id: u32,
    name: String,
    kind: LayerKind,
    frames: Vec<FrameId>,
    retired: Vec<FrameId>,
    cursor: usize,
    direction: i32,
    recording: bool,
    playing: bool,
    display_live_view: bool,
    dirty: bool,
    capacity_warned: bool,
    params: KeyParams,
}

impl Layer {
    pub fn new(id: u32, name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            frames: Vec::new(),
            retired: Vec::new(),
            cursor: 0,
            direction: 1,
            recording: false,
            playing: false,
            display_live_view: matches!(kind, LayerKind::AlwaysLive),
            // Start dirty so the first tick pushes the default parameters
            // to the shader.
            dirty: true,
            capacity_warned: false,
            params: KeyParams::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn live_view(&self) -> bool {
        self.display_live_view
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn direction(&self) -> i32 {
        self.direction
    }

    pub fn params(&self) -> &KeyParams {
        &self.params
    }

    /// True for calls the always-live layer must ignore.
    fn reject_always_live(&self, op: &str) -> bool {
        if self.kind == LayerKind::AlwaysLive {
            log::warn!(
                "ignoring transport call `{}` on always-live layer {}",
                op,
                self.name
            );
            return true;
        }
        false
    }

    fn set_live_view_flag(&mut self, on: bool) {
        if self.display_live_view != on {
            self.display_live_view = on;
            self.dirty = true;
        }
    }

    /// Move all frames onto the retired list and reset the playback
    /// cursor. The textures stay alive until the compositor drains the
    /// list at the next tick.
    fn retire_frames(&mut self) {
        self.retired.extend(self.frames.drain(..));
        self.cursor = 0;
        self.direction = 1;
    }

    /// Begin a new recording run, discarding any previous take.
    /// No-op while already recording.
    pub fn start_recording(&mut self) {
        if self.reject_always_live("record") || self.recording {
            return;
        }
        self.playing = false;
        self.retire_frames();
        self.recording = true;
        self.capacity_warned = false;
    }

    /// End the current recording run and immediately start playback from
    /// the current cursor. No-op unless recording.
    pub fn stop_recording(&mut self) {
        if self.reject_always_live("stop") || !self.recording {
            return;
        }
        self.recording = false;
        self.playing = true;
        self.set_live_view_flag(false);
    }

    /// Start playback. No-op while recording.
    pub fn play(&mut self) {
        if self.reject_always_live("play") || self.recording {
            return;
        }
        self.playing = true;
        self.set_live_view_flag(false);
    }

    /// Stop playback, keeping the cursor where it is.
    pub fn pause(&mut self) {
        if self.reject_always_live("pause") {
            return;
        }
        self.playing = false;
    }

    /// Toggle thru mode. Turning it off with frames recorded restarts
    /// playback from the beginning.
    pub fn set_live_view(&mut self, on: bool) {
        if self.reject_always_live("thru") {
            return;
        }
        self.display_live_view = on;
        self.dirty = true;
        if on {
            self.playing = false;
        } else if !self.frames.is_empty() {
            self.playing = true;
            self.direction = 1;
            self.cursor = 0;
        }
    }

    /// Discard all captured frames regardless of state. The
    /// recording/playing flags are left alone; playback naturally no-ops
    /// on an empty sequence.
    pub fn clear(&mut self) {
        self.retire_frames();
    }

    pub fn set_thresh_percent(&mut self, pct: u32) {
        self.params.thresh = percent_to_unit(pct);
        self.dirty = true;
    }

    pub fn set_softness_percent(&mut self, pct: u32) {
        self.params.softness = percent_to_unit(pct);
        self.dirty = true;
    }

    pub fn set_invert_percent(&mut self, pct: u32) {
        self.params.invert = percent_to_unit(pct);
        self.dirty = true;
    }

    pub fn set_opacity_percent(&mut self, pct: u32) {
        self.params.opacity = percent_to_unit(pct);
        self.dirty = true;
    }

    pub fn thresh_percent(&self) -> u32 {
        unit_to_percent(self.params.thresh)
    }

    pub fn softness_percent(&self) -> u32 {
        unit_to_percent(self.params.softness)
    }

    pub fn invert_percent(&self) -> u32 {
        unit_to_percent(self.params.invert)
    }

    pub fn opacity_percent(&self) -> u32 {
        unit_to_percent(self.params.opacity)
    }

    // ---- tick-side interface, called by the compositor ----

    /// Consume the dirty flag. Returns true at most once per mutation
    /// batch between two ticks.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Release every retired frame into `sink`.
    pub fn dispose_retired(&mut self, sink: &mut impl ReleaseFrames) {
        for id in self.retired.drain(..) {
            sink.release(id);
        }
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Append a frame captured this tick.
    pub fn push_frame(&mut self, id: FrameId) {
        self.frames.push(id);
    }

    /// Mark the capture capacity as hit; returns true only the first time
    /// per recording run so the warning is logged once.
    pub fn note_capacity_reached(&mut self) -> bool {
        !std::mem::replace(&mut self.capacity_warned, true)
    }

    /// Applied by the compositor when thru mode takes effect on screen.
    pub fn reset_for_live_view(&mut self) {
        self.playing = false;
        self.cursor = 0;
        self.direction = 1;
    }

    /// One playback step: returns the frame to show this tick and moves
    /// the cursor, bouncing at both ends. Both boundary checks are
    /// independent; on a single-frame sequence the cursor holds at 0 and
    /// the direction flips every tick with no visible effect.
    pub fn advance_playback(&mut self) -> Option<FrameId> {
        if !self.playing || self.frames.is_empty() {
            return None;
        }
        let last = self.frames.len() - 1;
        let frame = self.frames[self.cursor.min(last)];
        let next = self.cursor as i64 + self.direction as i64;
        if next >= last as i64 {
            self.direction = -1;
        }
        if next <= 0 {
            self.direction = 1;
        }
        self.cursor = next.clamp(0, last as i64) as usize;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::frames::test_support::ReleaseCounter;

    fn recordable() -> Layer {
        Layer::new(0, "layer-1", LayerKind::Recordable)
    }

    fn with_frames(n: u64) -> Layer {
        let mut layer = recordable();
        layer.start_recording();
        for i in 0..n {
            layer.push_frame(FrameId(i));
        }
        layer.stop_recording();
        layer
    }

    #[test]
    fn test_new_layer_defaults() {
        let layer = recordable();
        assert_eq!(layer.frame_count(), 0);
        assert!(!layer.is_recording());
        assert!(!layer.is_playing());
        assert!(!layer.live_view());
        assert_eq!(layer.opacity_percent(), 100);
    }

    #[test]
    fn test_recording_and_playing_mutually_exclusive() {
        let mut layer = with_frames(3);
        assert!(layer.is_playing());
        layer.start_recording();
        assert!(layer.is_recording());
        assert!(!layer.is_playing());
    }

    #[test]
    fn test_live_view_and_playing_mutually_exclusive() {
        let mut layer = with_frames(3);
        layer.set_live_view(true);
        assert!(layer.live_view());
        assert!(!layer.is_playing());
        layer.play();
        assert!(layer.is_playing());
        assert!(!layer.live_view());
    }

    #[test]
    fn test_start_recording_idempotent() {
        let mut layer = recordable();
        layer.start_recording();
        layer.push_frame(FrameId(1));
        layer.push_frame(FrameId(2));
        // A second call while recording must not clear the take.
        layer.start_recording();
        assert_eq!(layer.frame_count(), 2);
        assert_eq!(layer.retired_count(), 0);
    }

    #[test]
    fn test_pause_idempotent() {
        let mut layer = with_frames(2);
        layer.pause();
        let cursor = layer.cursor();
        let direction = layer.direction();
        layer.pause();
        assert!(!layer.is_playing());
        assert_eq!(layer.cursor(), cursor);
        assert_eq!(layer.direction(), direction);
    }

    #[test]
    fn test_play_is_noop_while_recording() {
        let mut layer = recordable();
        layer.start_recording();
        layer.play();
        assert!(layer.is_recording());
        assert!(!layer.is_playing());
    }

    #[test]
    fn test_record_playback_round_trip() {
        let mut layer = recordable();
        layer.start_recording();
        for i in 0..5 {
            layer.push_frame(FrameId(i));
        }
        layer.stop_recording();
        assert_eq!(layer.frame_count(), 5);
        assert!(layer.is_playing());
        assert!(!layer.is_recording());
        assert_eq!(layer.advance_playback(), Some(FrameId(0)));
    }

    #[test]
    fn test_ping_pong_sequence() {
        let mut layer = with_frames(5);
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(layer.advance_playback().unwrap().0);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 3, 2, 1]);
    }

    #[test]
    fn test_cursor_stays_in_bounds() {
        let mut layer = with_frames(5);
        for _ in 0..100 {
            layer.advance_playback().unwrap();
            assert!(layer.cursor() < layer.frame_count());
        }
    }

    #[test]
    fn test_single_frame_flips_direction_without_moving() {
        let mut layer = with_frames(1);
        for _ in 0..4 {
            let before = layer.direction();
            assert_eq!(layer.advance_playback(), Some(FrameId(0)));
            assert_eq!(layer.cursor(), 0);
            assert_eq!(layer.direction(), -before);
        }
    }

    #[test]
    fn test_playback_noop_when_empty() {
        let mut layer = recordable();
        layer.play();
        assert_eq!(layer.advance_playback(), None);
    }

    #[test]
    fn test_clear_retires_all_frames() {
        let mut layer = with_frames(5);
        let was_playing = layer.is_playing();
        layer.clear();
        assert_eq!(layer.frame_count(), 0);
        assert_eq!(layer.retired_count(), 5);
        assert_eq!(layer.is_playing(), was_playing);

        let mut sink = ReleaseCounter::default();
        layer.dispose_retired(&mut sink);
        assert_eq!(sink.released.len(), 5);
        assert_eq!(layer.retired_count(), 0);
    }

    #[test]
    fn test_start_recording_retires_previous_take() {
        let mut layer = with_frames(3);
        layer.start_recording();
        assert_eq!(layer.frame_count(), 0);
        assert_eq!(layer.retired_count(), 3);

        let mut sink = ReleaseCounter::default();
        layer.dispose_retired(&mut sink);
        assert_eq!(
            sink.released,
            vec![FrameId(0), FrameId(1), FrameId(2)]
        );
    }

    #[test]
    fn test_live_view_off_restarts_playback() {
        let mut layer = with_frames(5);
        // Walk the cursor away from the start first.
        for _ in 0..3 {
            layer.advance_playback();
        }
        layer.set_live_view(true);
        layer.set_live_view(false);
        assert!(layer.is_playing());
        assert_eq!(layer.cursor(), 0);
        assert_eq!(layer.direction(), 1);
    }

    #[test]
    fn test_live_view_off_without_frames_stays_idle() {
        let mut layer = recordable();
        layer.set_live_view(true);
        layer.set_live_view(false);
        assert!(!layer.is_playing());
    }

    #[test]
    fn test_dirty_consumed_once_per_batch() {
        let mut layer = recordable();
        assert!(layer.take_dirty());
        assert!(!layer.take_dirty());
        layer.set_opacity_percent(50);
        layer.set_thresh_percent(25);
        assert!(layer.take_dirty());
        assert!(!layer.take_dirty());
    }

    #[test]
    fn test_params_store_normalized_values() {
        let mut layer = recordable();
        layer.set_opacity_percent(50);
        layer.set_invert_percent(0);
        layer.set_softness_percent(10);
        layer.set_thresh_percent(75);
        assert_eq!(layer.params().opacity, 0.5);
        assert_eq!(layer.params().invert, 0.0);
        assert_eq!(layer.params().softness, 0.1);
        assert_eq!(layer.params().thresh, 0.75);
        assert_eq!(layer.opacity_percent(), 50);
        assert_eq!(layer.thresh_percent(), 75);
    }

    #[test]
    fn test_always_live_rejects_transport() {
        let mut layer = Layer::new(5, "live-feed", LayerKind::AlwaysLive);
        layer.start_recording();
        layer.play();
        layer.set_live_view(false);
        assert!(!layer.is_recording());
        assert!(!layer.is_playing());
        assert!(layer.live_view());
    }

    #[test]
    fn test_always_live_accepts_param_changes() {
        let mut layer = Layer::new(5, "live-feed", LayerKind::AlwaysLive);
        layer.take_dirty();
        layer.set_opacity_percent(40);
        assert!(layer.take_dirty());
        assert_eq!(layer.opacity_percent(), 40);
    }

    #[test]
    fn test_capacity_warning_fires_once_per_run() {
        let mut layer = recordable();
        layer.start_recording();
        assert!(layer.note_capacity_reached());
        assert!(!layer.note_capacity_reached());
        layer.stop_recording();
        layer.start_recording();
        assert!(layer.note_capacity_reached());
    }

    #[test]
    fn test_stale_cursor_cannot_outlive_take() {
        let mut layer = with_frames(5);
        for _ in 0..4 {
            layer.advance_playback();
        }
        layer.start_recording();
        for i in 0..2 {
            layer.push_frame(FrameId(100 + i));
        }
        layer.stop_recording();
        assert_eq!(layer.advance_playback(), Some(FrameId(100)));
        assert!(layer.cursor() < layer.frame_count());
    }
}
