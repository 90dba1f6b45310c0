//! Opacity fades for render views
//!
//! Pure next-state functions: each takes the previous [`FadeState`] and returns
//! the next one, so the transitions can be driven without an engine.

/// Opacity held for one frame at the end of a fade-out before the view turns off.
pub const FADE_OUT_EPSILON: f32 = 0.0001;

/// Marks that a fade-out has reached its floor and disables on the next step.
const FADE_OUT_DONE: f32 = -1.0;

/// Fade timers and current opacity of a view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeState {
    /// Fade-in duration in seconds, zero when not fading in
    pub fade_in: f32,
    /// Fade-out duration in seconds, zero when not fading out
    pub fade_out: f32,
    pub opacity_time: f32,
    pub opacity: f32,
}

impl Default for FadeState {
    fn default() -> Self {
        Self {
            fade_in: 0.0,
            fade_out: 0.0,
            opacity_time: 0.0,
            opacity: 1.0,
        }
    }
}

/// What the owner must do after a [`FadeState::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeStep {
    /// No fade is running
    Idle,
    /// Opacity changed; another frame is needed
    Fading,
    /// The fade-out finished; the view must be disabled
    Disable,
}

/// A non-zero duration, the only kind that starts a fade.
fn duration(fade: Option<f32>) -> Option<f32> {
    fade.filter(|seconds| *seconds != 0.0 && !seconds.is_nan())
}

impl FadeState {
    pub fn is_fading(&self) -> bool {
        self.fade_in != 0.0 || self.fade_out != 0.0
    }

    /// State after the view is enabled. The caller enables the view itself.
    pub fn enable(self, fade: Option<f32>) -> Self {
        match duration(fade) {
            Some(seconds) => Self {
                fade_in: seconds,
                fade_out: 0.0,
                opacity_time: 0.0,
                opacity: 0.0,
            },
            None => Self {
                opacity: 1.0,
                ..self
            },
        }
    }

    /// State after a disable request. Returns `true` when the view must be
    /// disabled right away rather than faded out.
    pub fn disable(self, fade: Option<f32>) -> (Self, bool) {
        match duration(fade) {
            Some(seconds) => (
                Self {
                    fade_in: 0.0,
                    fade_out: seconds,
                    opacity_time: seconds,
                    opacity: 1.0,
                },
                false,
            ),
            None => (
                Self {
                    opacity: 0.0,
                    ..self
                },
                true,
            ),
        }
    }

    /// Advance by `delta` seconds.
    ///
    /// Fade-in eases in quadratically as `t² / duration` and clears once it
    /// passes 1. Fade-out decays linearly to [`FADE_OUT_EPSILON`], holds it for
    /// one step, then asks for the view to be disabled.
    pub fn step(self, delta: f32) -> (Self, FadeStep) {
        if self.fade_in != 0.0 {
            let opacity_time = self.opacity_time + delta;
            let opacity = opacity_time * opacity_time / self.fade_in;
            if opacity > 1.0 {
                return (
                    Self {
                        fade_in: 0.0,
                        opacity_time: 0.0,
                        opacity: 1.0,
                        ..self
                    },
                    FadeStep::Fading,
                );
            }
            return (
                Self {
                    opacity_time,
                    opacity,
                    ..self
                },
                FadeStep::Fading,
            );
        }

        if self.fade_out != 0.0 {
            if self.opacity_time == FADE_OUT_DONE {
                return (
                    Self {
                        fade_out: 0.0,
                        opacity_time: 0.0,
                        opacity: 0.0,
                        ..self
                    },
                    FadeStep::Disable,
                );
            }
            let opacity_time = self.opacity_time - delta;
            let next = if opacity_time <= 0.0 {
                Self {
                    opacity_time: FADE_OUT_DONE,
                    opacity: FADE_OUT_EPSILON,
                    ..self
                }
            } else {
                Self {
                    opacity_time,
                    opacity: opacity_time / self.fade_out,
                    ..self
                }
            };
            return (next, FadeStep::Fading);
        }

        (self, FadeStep::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_in_is_quadratic() {
        let state = FadeState::default().enable(Some(1.0));
        assert_eq!(state.opacity, 0.0);

        let (state, step) = state.step(0.25);
        assert_eq!(step, FadeStep::Fading);
        let (state, _) = state.step(0.25);
        assert!((state.opacity - 0.25).abs() < 1e-6);

        let (state, _) = state.step(0.6);
        assert_eq!(state.opacity, 1.0);
        assert!(!state.is_fading());
        assert_eq!(state.step(0.1).1, FadeStep::Idle);
    }

    #[test]
    fn fade_out_holds_epsilon_then_disables() {
        let (mut state, immediate) = FadeState::default().disable(Some(2.0));
        assert!(!immediate);
        assert_eq!(state.opacity, 1.0);

        for _ in 0..3 {
            let (next, step) = state.step(0.5);
            assert_eq!(step, FadeStep::Fading);
            state = next;
        }
        assert!((state.opacity - 0.25).abs() < 1e-6);

        let (state, step) = state.step(0.5);
        assert_eq!(step, FadeStep::Fading);
        assert_eq!(state.opacity, FADE_OUT_EPSILON);

        let (state, step) = state.step(0.5);
        assert_eq!(step, FadeStep::Disable);
        assert_eq!(state.opacity, 0.0);
        assert!(!state.is_fading());
    }

    #[test]
    fn zero_duration_is_immediate() {
        let state = FadeState {
            opacity: 0.3,
            ..Default::default()
        };
        assert_eq!(state.enable(Some(0.0)).opacity, 1.0);
        assert_eq!(state.enable(None).opacity, 1.0);

        let (state, immediate) = state.disable(None);
        assert!(immediate);
        assert_eq!(state.opacity, 0.0);
    }

    #[test]
    fn enable_interrupts_fade_out() {
        let (state, _) = FadeState::default().disable(Some(1.0));
        let state = state.enable(Some(0.5));
        assert_eq!(state.fade_out, 0.0);
        assert_eq!(state.fade_in, 0.5);
    }
}
