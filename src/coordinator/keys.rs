//! Key bindings for the control plane.
//!
//! The mapping is a tagged action per key plus a pure [`apply`] over
//! [`ControlState`]. Side effects (limiter updates, terminal writes) stay
//! with the caller, which keeps every binding testable without a terminal.

use crate::constants::{MIN_KEYBOARD_RATE, PAUSE_RATE};

/// What a key asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// `i`: print a status block.
    ShowStatus,
    /// `u`: drop the limit entirely.
    Unlimited,
    /// `r`: restore the rate given at startup.
    RestoreInitial,
    /// `a`/`s`/`d`/`f` and `z`/`x`/`c`/`v`: step the limit in bytes/s.
    Adjust(i64),
    /// `0`-`9`: jump straight to a rate.
    SetRate(u64),
    /// `p`: pause once the current part finishes.
    TogglePartPause,
    /// Space: fast-pause (limit to a trickle), or cancel a pending exit.
    Space,
    /// `?`.
    Help,
    /// Enter.
    Newline,
}

/// Map a published character to its action, if it has one.
#[must_use]
pub fn action_for(key: char) -> Option<KeyAction> {
    Some(match key {
        'i' => KeyAction::ShowStatus,
        'u' => KeyAction::Unlimited,
        'r' => KeyAction::RestoreInitial,
        'a' => KeyAction::Adjust(1_000),
        's' => KeyAction::Adjust(10_000),
        'd' => KeyAction::Adjust(100_000),
        'f' => KeyAction::Adjust(250_000),
        'z' => KeyAction::Adjust(-1_000),
        'x' => KeyAction::Adjust(-10_000),
        'c' => KeyAction::Adjust(-100_000),
        'v' => KeyAction::Adjust(-250_000),
        '0'..='9' => {
            let digit = u64::from(key) - u64::from('0');
            KeyAction::SetRate(if digit == 0 {
                1_000_000
            } else {
                digit * 100_000
            })
        }
        'p' => KeyAction::TogglePartPause,
        ' ' => KeyAction::Space,
        '?' => KeyAction::Help,
        '\n' | '\r' => KeyAction::Newline,
        _ => return None,
    })
}

/// The control-plane state the key handlers mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    /// The live limit, bytes/s; `0` means unlimited.
    pub rate: u64,
    /// The `--bwlimit` value, restored by `r`.
    pub initial_rate: u64,
    /// Rate to restore when the space-pause lifts.
    saved_rate: u64,
    /// Pause once the current part finishes.
    pub paused: bool,
    /// Whether the pause came from the space key (and saved a rate).
    fast_paused: bool,
    /// A soft exit is pending; space cancels it.
    pub exit_pending: bool,
}

impl ControlState {
    #[must_use]
    pub fn new(rate: u64, initial_rate: u64) -> Self {
        Self {
            rate,
            initial_rate,
            saved_rate: rate,
            paused: false,
            fast_paused: false,
            exit_pending: false,
        }
    }
}

/// What the caller should do about an applied action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    /// Push the new rate to the limiter and announce it.
    RateChanged(u64),
    ShowStatus,
    PartPause(bool),
    FastPause { paused: bool, rate: u64 },
    ExitCancelled,
    Help,
    Newline,
}

/// Apply one action. Pure: no terminal writes, no limiter calls.
pub fn apply(action: KeyAction, state: &mut ControlState) -> Feedback {
    match action {
        KeyAction::ShowStatus => Feedback::ShowStatus,
        KeyAction::Unlimited => {
            state.rate = 0;
            Feedback::RateChanged(0)
        }
        KeyAction::RestoreInitial => {
            state.rate = state.initial_rate;
            Feedback::RateChanged(state.rate)
        }
        KeyAction::Adjust(delta) => {
            let mut rate = state.rate as i64;
            // Stepping off the floor (or off unlimited) with anything but
            // the smallest increment starts from zero, so one press of a
            // big step yields exactly that step.
            if rate <= MIN_KEYBOARD_RATE as i64 && delta != MIN_KEYBOARD_RATE as i64 {
                rate = 0;
            }
            rate = rate.saturating_add(delta).max(MIN_KEYBOARD_RATE as i64);
            state.rate = rate as u64;
            Feedback::RateChanged(state.rate)
        }
        KeyAction::SetRate(rate) => {
            state.rate = rate;
            Feedback::RateChanged(rate)
        }
        KeyAction::TogglePartPause => {
            state.paused = !state.paused;
            Feedback::PartPause(state.paused)
        }
        KeyAction::Space => {
            if state.exit_pending {
                state.exit_pending = false;
                Feedback::ExitCancelled
            } else if state.paused {
                state.paused = false;
                if state.fast_paused {
                    state.fast_paused = false;
                    state.rate = state.saved_rate;
                }
                Feedback::FastPause {
                    paused: false,
                    rate: state.rate,
                }
            } else {
                state.paused = true;
                state.fast_paused = true;
                state.saved_rate = state.rate;
                state.rate = PAUSE_RATE;
                Feedback::FastPause {
                    paused: true,
                    rate: state.rate,
                }
            }
        }
        KeyAction::Help => Feedback::Help,
        KeyAction::Newline => Feedback::Newline,
    }
}
