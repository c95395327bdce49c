//! Keyboard input for the interactive control plane.
//!
//! One task reads key events in raw mode and publishes them on a bounded
//! channel of capacity 1. Drop-newest semantics are fine here: events
//! represent user intent, not data, and a user who types faster than the
//! coordinator drains simply repeats the key.
//!
//! While an MFA prompt is outstanding the reader switches into a sub-mode
//! that collects digits for the credential provider instead of publishing
//! command keys.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context as _, Result};
use crossterm::event::{self, Event as TermEvent, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::warn;

use crate::ui;

/// Event published to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A key pressed outside the MFA sub-mode. Enter arrives as `'\n'`,
    /// backspace/DEL as `'\x7f'`.
    Key(char),
}

/// Interrupt bookkeeping shared by the SIGINT handler, the raw-mode Ctrl-C
/// path, and the coordinator.
///
/// The first interrupt marks the upload for a soft exit after the current
/// part; the second restores the terminal and exits immediately.
#[derive(Debug, Default)]
pub struct Interrupts {
    pending: AtomicBool,
    notify: Notify,
}

impl Interrupts {
    /// Register one interrupt. Exits the process on the second.
    pub fn fire(&self) {
        if self.pending.swap(true, Ordering::SeqCst) {
            let _ = terminal::disable_raw_mode();
            eprintln!();
            std::process::exit(1);
        }
        ui::interrupt_notice();
        self.notify.notify_waiters();
    }

    /// Whether a soft exit is pending.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Cancel a pending soft exit (the space key).
    pub fn clear(&self) {
        self.pending.store(false, Ordering::SeqCst);
    }

    /// Wait until an interrupt fires. Used by loops that would otherwise
    /// block past an interrupt, like the pause gate.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Scoped raw-mode toggle. Restores the previous terminal state on drop, on
/// every exit path that unwinds.
#[derive(Debug)]
pub struct RawModeGuard(());

impl RawModeGuard {
    /// Enable raw mode. On failure (no tty, weird terminal) prints a warning
    /// and returns `None`; line-buffered input still works, the user just
    /// has to press enter after each key.
    pub fn enable() -> Option<Self> {
        match terminal::enable_raw_mode() {
            Ok(()) => Some(Self(())),
            Err(err) => {
                warn!(error = %err, "could not configure the terminal");
                eprintln!(
                    "Warning: could not configure the terminal. \
                     You have to use the enter key after each keyboard input."
                );
                None
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

struct MfaRequest {
    buffer: String,
    respond: oneshot::Sender<String>,
}

/// Handle through which the credential provider asks the dispatcher for a
/// one-time code. Cloneable; the dispatcher holds the other end.
#[derive(Clone, Default)]
pub struct MfaPrompt {
    inner: Arc<Mutex<Option<MfaRequest>>>,
}

impl MfaPrompt {
    /// Prompt for a code and wait for the user to finish typing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher goes away mid-prompt.
    pub async fn request(&self, prompt: &str) -> Result<String> {
        let (respond, code) = oneshot::channel();
        eprint!("{prompt}");
        *self.inner.lock() = Some(MfaRequest {
            buffer: String::new(),
            respond,
        });
        code.await.context("input dispatcher closed during MFA prompt")
    }

    /// Whether a prompt is outstanding (the dispatcher is in the sub-mode).
    #[must_use]
    pub fn is_prompting(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Feed one character into the sub-mode. Digits accumulate and echo,
    /// backspace deletes one, enter finishes the code. Returns `false` when
    /// no prompt is outstanding and the key should be dispatched normally.
    pub fn feed(&self, c: char) -> bool {
        let mut slot = self.inner.lock();
        let Some(request) = slot.as_mut() else {
            return false;
        };
        match c {
            '0'..='9' => {
                request.buffer.push(c);
                eprint!("{c}");
            }
            '\x08' | '\x7f' => {
                if request.buffer.pop().is_some() {
                    eprint!("\x08 \x08");
                }
            }
            '\n' | '\r' => {
                eprint!("\r\n");
                if let Some(request) = slot.take() {
                    let _ = request.respond.send(request.buffer);
                }
            }
            _ => {}
        }
        true
    }
}

/// Owns the stdin reader task and the event channel's receiving end.
pub struct InputDispatcher {
    events: mpsc::Receiver<Event>,
    mfa: MfaPrompt,
}

impl InputDispatcher {
    /// Spawn the reader task and return the dispatcher.
    #[must_use]
    pub fn spawn(interrupts: Arc<Interrupts>) -> Self {
        let (tx, events) = mpsc::channel(1);
        let mfa = MfaPrompt::default();

        let reader_mfa = mfa.clone();
        tokio::spawn(async move {
            loop {
                // Poll with a short timeout so this task stays cancellable.
                let ready = event::poll(Duration::from_millis(50)).unwrap_or(false);
                if !ready {
                    tokio::task::yield_now().await;
                    continue;
                }
                let Ok(TermEvent::Key(key)) = event::read() else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if key.modifiers.contains(KeyModifiers::CONTROL)
                    && key.code == KeyCode::Char('c')
                {
                    // Raw mode suppresses SIGINT generation; route Ctrl-C
                    // through the same path the signal handler uses.
                    interrupts.fire();
                    continue;
                }
                let Some(c) = translate(key.code) else {
                    continue;
                };
                if reader_mfa.feed(c) {
                    continue;
                }
                publish(&tx, Event::Key(c));
            }
        });

        Self { events, mfa }
    }

    /// The MFA prompt handle for the credential provider.
    #[must_use]
    pub fn mfa(&self) -> MfaPrompt {
        self.mfa.clone()
    }

    /// Tear into the receiving end the coordinator consumes.
    #[must_use]
    pub fn into_events(self) -> mpsc::Receiver<Event> {
        self.events
    }
}

/// Register the SIGINT handler. Also covers terminals where raw mode could
/// not be enabled and Ctrl-C still raises a signal.
pub fn spawn_signal_task(interrupts: Arc<Interrupts>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            interrupts.fire();
        }
    });
}

/// Map a key code to the character the control plane understands.
fn translate(code: KeyCode) -> Option<char> {
    match code {
        KeyCode::Char(c) => Some(c),
        KeyCode::Enter => Some('\n'),
        KeyCode::Backspace | KeyCode::Delete => Some('\x7f'),
        _ => None,
    }
}

/// Publish with drop-newest semantics: a full channel means the coordinator
/// has not consumed the previous intent yet.
fn publish(tx: &mpsc::Sender<Event>, event: Event) {
    let _ = tx.try_send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_maps_command_keys() {
        assert_eq!(translate(KeyCode::Char('u')), Some('u'));
        assert_eq!(translate(KeyCode::Char(' ')), Some(' '));
        assert_eq!(translate(KeyCode::Enter), Some('\n'));
        assert_eq!(translate(KeyCode::Backspace), Some('\x7f'));
        assert_eq!(translate(KeyCode::Esc), None);
        assert_eq!(translate(KeyCode::F(1)), None);
    }

    #[test]
    fn publish_drops_newest_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        publish(&tx, Event::Key('a'));
        publish(&tx, Event::Key('b'));
        assert_eq!(rx.try_recv().unwrap(), Event::Key('a'));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn mfa_feed_is_inert_without_a_prompt() {
        let prompt = MfaPrompt::default();
        assert!(!prompt.feed('1'));
        assert!(!prompt.is_prompting());
    }

    #[tokio::test]
    async fn mfa_collects_digits_and_backspace() {
        let prompt = MfaPrompt::default();
        let waiter = {
            let prompt = prompt.clone();
            tokio::spawn(async move { prompt.request("MFA code: ").await })
        };
        // Wait for the request to be registered.
        while !prompt.is_prompting() {
            tokio::task::yield_now().await;
        }

        for c in ['1', '2', 'x', '9', '\x7f', '4', '\n'] {
            assert!(prompt.feed(c), "sub-mode should consume {c:?}");
        }
        let code = waiter.await.unwrap().unwrap();
        assert_eq!(code, "124");
        assert!(!prompt.is_prompting());
    }
}
