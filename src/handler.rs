use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crate::app::{App, AuthPhase, InputMode, PendingRequest, RequestKind, Screen};
use crate::auth::{self, SystemBrowser};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    // A blocking notice eats every key until dismissed
    if app.notice.is_some() {
        if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
            app.notice = None;
        }
        return;
    }

    match app.screen {
        Screen::Login => handle_login_key(app, key),
        Screen::Chat => match app.input_mode {
            InputMode::Normal => handle_chat_normal(app, key),
            InputMode::Editing => handle_chat_editing(app, key),
        },
    }
}

fn handle_login_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        KeyCode::Enter | KeyCode::Char('c') => start_login(app),

        // Abandon the browser wait; the exchange itself is never cancelled.
        KeyCode::Esc => {
            if app.session.phase == AuthPhase::WaitingForBrowser {
                if let Some(pending) = app.pending.take() {
                    pending.handle.abort();
                }
                app.session.phase = AuthPhase::LoggedOut;
            }
        }

        _ => {}
    }
}

fn start_login(app: &mut App) {
    let Some(client_id) = app.client_id.clone() else {
        app.notice = Some(
            "No Strava client ID configured. Set STRAVA_CLIENT_ID or add \
             \"client_id\" to the config file."
                .to_string(),
        );
        return;
    };

    if !app.begin_login() {
        return;
    }

    app.pending = Some(PendingRequest {
        kind: RequestKind::CaptureRedirect,
        handle: tokio::spawn(async move { auth::login(SystemBrowser, &client_id).await }),
    });
}

fn handle_chat_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        KeyCode::Char('i') | KeyCode::Char('a') => {
            app.input_mode = InputMode::Editing;
            app.input_cursor = app.input.chars().count();
        }

        // Chat scrolling
        KeyCode::Char('j') | KeyCode::Down => {
            app.chat_scroll = app.chat_scroll.saturating_add(1);
        }
        KeyCode::Char('k') | KeyCode::Up => {
            app.chat_scroll = app.chat_scroll.saturating_sub(1);
        }
        KeyCode::Char('g') => app.chat_scroll = 0,
        KeyCode::Char('G') => app.scroll_chat_to_bottom(),

        _ => {}
    }
}

fn handle_chat_editing(app: &mut App, key: KeyEvent) {
    // The input control is disabled while a request is outstanding
    if app.session.request_in_flight {
        if key.code == KeyCode::Esc {
            app.input_mode = InputMode::Normal;
        }
        return;
    }

    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            if let Some(question) = accept_submission(app) {
                let backend = app.backend.clone();
                app.pending = Some(PendingRequest {
                    kind: RequestKind::Answer,
                    handle: tokio::spawn(async move {
                        backend.ask(&question.text, &question.token).await
                    }),
                });
            }
        }
        KeyCode::Backspace => {
            if app.input_cursor > 0 {
                app.input_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.input_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.input_cursor = app.input_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.input_cursor = (app.input_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.input_cursor = 0;
        }
        KeyCode::End => {
            app.input_cursor = app.input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
            app.input.insert(byte_pos, c);
            app.input_cursor += 1;
        }
        _ => {}
    }
}

struct AcceptedQuestion {
    text: String,
    token: String,
}

/// Run the submit preconditions and pair the accepted question with the
/// session credential the backend call needs.
fn accept_submission(app: &mut App) -> Option<AcceptedQuestion> {
    let token = app.session.token.clone()?;
    let text = app.submit()?;
    Some(AcceptedQuestion { text, token })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_to_byte_index_handles_multibyte_input() {
        let s = "héllo wörld";
        assert_eq!(char_to_byte_index(s, 0), 0);
        assert_eq!(char_to_byte_index(s, 2), 3); // after 'h' + two-byte 'é'
        assert_eq!(char_to_byte_index(s, 100), s.len());
    }
}
