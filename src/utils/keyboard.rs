use std::io::stdout;
use std::time::Duration;

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
    Result,
};

/// What the operator pressed while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyPress {
    Escape,
    /// Ctrl+C, which raw mode turns into a key event instead of a signal.
    Interrupt,
    Other,
}

/// Wait up to `timeout` for a key press.
pub(crate) fn poll_escape(timeout: Duration) -> Result<Option<KeyPress>> {
    enable_raw_mode()?;
    execute!(stdout(), Hide)?;
    let ready = poll(timeout);
    execute!(stdout(), MoveToColumn(0), Show)?;
    if !ready? {
        disable_raw_mode()?;
        return Ok(None);
    }

    // `read` does not block once `poll` returned `true`.
    let event = read();
    disable_raw_mode()?;
    let press = match event? {
        Event::Key(KeyEvent {
            code: KeyCode::Esc, ..
        }) => KeyPress::Escape,
        Event::Key(KeyEvent {
            modifiers: KeyModifiers::CONTROL,
            code: KeyCode::Char('c'),
        }) => KeyPress::Interrupt,
        _ => KeyPress::Other,
    };
    Ok(Some(press))
}
