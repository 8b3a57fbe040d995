use anyhow::Result;
use tokio::task::JoinHandle;
use crate::backend::BackendClient;
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Where the session stands in the OAuth login flow. `Authenticated` is
/// terminal: it never regresses for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    LoggedOut,
    WaitingForBrowser,
    Exchanging,
    Authenticated,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// What the single pending network task is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    CaptureRedirect,
    Exchange,
    Answer,
}

pub struct PendingRequest {
    pub kind: RequestKind,
    pub handle: JoinHandle<Result<String>>,
}

pub const GREETING: &str =
    "Hello! I'm connected to your Strava. Ask me anything about your activities!";
pub const ANSWER_FALLBACK: &str = "Sorry, I encountered an error analyzing your data.";
pub const LOGIN_FAILED_NOTICE: &str = "Failed to connect with Strava.";

/// Per-process session state: created at startup, dropped at exit.
/// The message log is append-only; `request_in_flight` serializes all
/// backend calls, so at most one is ever outstanding.
pub struct Session {
    pub phase: AuthPhase,
    pub token: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub request_in_flight: bool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: AuthPhase::LoggedOut,
            token: None,
            messages: Vec::new(),
            request_in_flight: false,
        }
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub screen: Screen,
    pub input_mode: InputMode,
    pub session: Session,

    // Pending input buffer
    pub input: String,
    pub input_cursor: usize, // cursor position in input, in chars

    // Chat viewport
    pub chat_scroll: u16,
    pub chat_height: u16, // inner height of the chat area, set during render
    pub chat_width: u16,  // inner width, for wrap calculations

    // Blocking notice (login failures); dismissed with Enter/Esc
    pub notice: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // The one in-flight task; resolved by the run loop
    pub pending: Option<PendingRequest>,

    pub backend: BackendClient,
    pub client_id: Option<String>,
}

impl App {
    pub fn new(config: &Config) -> Self {
        Self {
            should_quit: false,
            screen: Screen::Login,
            input_mode: InputMode::Normal,
            session: Session::new(),

            input: String::new(),
            input_cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            notice: None,
            animation_frame: 0,
            pending: None,

            backend: BackendClient::new(&config.backend_url()),
            client_id: config.client_id(),
        }
    }

    /// Move the session into the browser wait. Refused outside `LoggedOut`
    /// so a second keypress cannot start a second login flow.
    pub fn begin_login(&mut self) -> bool {
        if self.session.phase != AuthPhase::LoggedOut || self.pending.is_some() {
            return false;
        }
        self.session.phase = AuthPhase::WaitingForBrowser;
        true
    }

    /// Accept a captured authorization code for exchange. Returns false once
    /// authenticated: a stale code is never reprocessed.
    pub fn begin_exchange(&mut self) -> bool {
        if self.session.token.is_some() {
            return false;
        }
        self.session.phase = AuthPhase::Exchanging;
        self.session.request_in_flight = true;
        true
    }

    /// Resolve the code exchange. Success commits the credential and the
    /// greeting in one step; failure commits nothing.
    pub fn resolve_exchange(&mut self, result: Result<String>) {
        match result {
            Ok(token) => {
                self.session.token = Some(token);
                self.session.phase = AuthPhase::Authenticated;
                self.screen = Screen::Chat;
                self.input_mode = InputMode::Editing;
                self.session.messages.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: GREETING.to_string(),
                });
                self.scroll_chat_to_bottom();
            }
            Err(err) => {
                tracing::error!("code exchange failed: {err:#}");
                self.session.phase = AuthPhase::LoggedOut;
                self.notice = Some(LOGIN_FAILED_NOTICE.to_string());
            }
        }
        // Cleared last, success or failure.
        self.session.request_in_flight = false;
    }

    /// The login flow fell over before a code could be exchanged (capture
    /// timeout, provider error parameter, no code in the redirect).
    pub fn login_failed(&mut self) {
        self.session.phase = AuthPhase::LoggedOut;
        self.session.request_in_flight = false;
        self.notice = Some(LOGIN_FAILED_NOTICE.to_string());
    }

    /// Accept the pending input as a question. Preconditions: non-blank
    /// text, a credential, and no request outstanding; any violation is a
    /// silent no-op. On acceptance the user message is appended, the input
    /// buffer cleared, and the in-flight flag set; the caller issues the
    /// backend call with the returned text.
    pub fn submit(&mut self) -> Option<String> {
        let text = self.input.trim();
        if text.is_empty() || self.session.token.is_none() || self.session.request_in_flight {
            return None;
        }
        let question = text.to_string();
        self.session.messages.push(ChatMessage {
            role: ChatRole::User,
            content: question.clone(),
        });
        self.input.clear();
        self.input_cursor = 0;
        self.session.request_in_flight = true;
        self.scroll_chat_to_bottom();
        Some(question)
    }

    /// Resolve the answer for the current turn. Failures become a fixed
    /// fallback message; the raw error goes to the diagnostic log only.
    pub fn resolve_answer(&mut self, result: Result<String>) {
        let content = match result {
            Ok(answer) => answer,
            Err(err) => {
                tracing::error!("chat query failed: {err:#}");
                ANSWER_FALLBACK.to_string()
            }
        };
        self.session.messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content,
        });
        self.scroll_chat_to_bottom();
        // Cleared last, success or failure.
        self.session.request_in_flight = false;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.request_in_flight || self.session.phase == AuthPhase::WaitingForBrowser {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    /// Scroll the chat so the newest message (and the busy line, if any)
    /// is visible.
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in &self.session.messages {
            total_lines += 1; // Role line ("You:" or "AI:")
            for line in msg.content.lines() {
                // Character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                if char_count == 0 {
                    total_lines += 1;
                } else {
                    total_lines += ((char_count / wrap_width) + 1) as u16;
                }
            }
            total_lines += 1; // Blank line after message
        }

        if self.session.request_in_flight {
            total_lines += 2; // "AI:" + busy line
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        if total_lines > visible_height {
            self.chat_scroll = total_lines.saturating_sub(visible_height);
        } else {
            self.chat_scroll = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn logged_out_app() -> App {
        App::new(&Config::new())
    }

    fn authenticated_app() -> App {
        let mut app = logged_out_app();
        assert!(app.begin_exchange());
        app.resolve_exchange(Ok("tok1".to_string()));
        app
    }

    #[test]
    fn exchange_success_authenticates_and_seeds_greeting() {
        let mut app = logged_out_app();
        assert!(app.begin_exchange());
        assert!(app.session.request_in_flight);

        app.resolve_exchange(Ok("tok1".to_string()));

        assert_eq!(app.session.token.as_deref(), Some("tok1"));
        assert_eq!(app.session.phase, AuthPhase::Authenticated);
        assert_eq!(app.screen, Screen::Chat);
        assert_eq!(app.session.messages.len(), 1);
        assert_eq!(app.session.messages[0].role, ChatRole::Assistant);
        assert_eq!(app.session.messages[0].content, GREETING);
        assert!(!app.session.request_in_flight);
    }

    #[test]
    fn exchange_failure_commits_nothing() {
        let mut app = logged_out_app();
        assert!(app.begin_exchange());

        app.resolve_exchange(Err(anyhow!("backend returned 400")));

        assert!(app.session.token.is_none());
        assert!(app.session.messages.is_empty());
        assert_eq!(app.session.phase, AuthPhase::LoggedOut);
        assert_eq!(app.notice.as_deref(), Some(LOGIN_FAILED_NOTICE));
        assert!(!app.session.request_in_flight);
    }

    #[test]
    fn stale_code_is_ignored_once_authenticated() {
        let mut app = authenticated_app();

        assert!(!app.begin_exchange());

        assert_eq!(app.session.phase, AuthPhase::Authenticated);
        assert_eq!(app.session.messages.len(), 1);
        assert!(!app.session.request_in_flight);
    }

    #[test]
    fn submit_rejects_blank_input() {
        let mut app = authenticated_app();
        app.input = "   \n ".to_string();

        assert!(app.submit().is_none());

        assert_eq!(app.session.messages.len(), 1);
        assert_eq!(app.input, "   \n ");
        assert!(!app.session.request_in_flight);
    }

    #[test]
    fn submit_rejects_without_credential() {
        let mut app = logged_out_app();
        app.input = "How far did I run in 2025?".to_string();

        assert!(app.submit().is_none());

        assert!(app.session.messages.is_empty());
        assert_eq!(app.input, "How far did I run in 2025?");
    }

    #[test]
    fn submit_rejects_while_request_in_flight() {
        let mut app = authenticated_app();
        app.input = "first question".to_string();
        assert!(app.submit().is_some());

        app.input = "second question".to_string();
        assert!(app.submit().is_none());

        assert_eq!(app.session.messages.len(), 2); // greeting + first question
        assert_eq!(app.input, "second question");
    }

    #[test]
    fn successful_turn_appends_question_then_answer() {
        let mut app = authenticated_app();
        app.input = "  How far did I run in 2025?  ".to_string();

        let question = app.submit();
        assert_eq!(question.as_deref(), Some("How far did I run in 2025?"));
        assert!(app.input.is_empty());
        assert!(app.session.request_in_flight);

        app.resolve_answer(Ok("312 miles".to_string()));

        let tail = &app.session.messages[app.session.messages.len() - 2..];
        assert_eq!(tail[0].role, ChatRole::User);
        assert_eq!(tail[0].content, "How far did I run in 2025?");
        assert_eq!(tail[1].role, ChatRole::Assistant);
        assert_eq!(tail[1].content, "312 miles");
        assert!(!app.session.request_in_flight);
    }

    #[test]
    fn failed_turn_appends_fixed_fallback() {
        let mut app = authenticated_app();
        app.input = "How far did I run in 2025?".to_string();
        assert!(app.submit().is_some());

        app.resolve_answer(Err(anyhow!("backend returned 500")));

        let last = app.session.messages.last().unwrap();
        assert_eq!(last.role, ChatRole::Assistant);
        assert_eq!(last.content, ANSWER_FALLBACK);
        assert!(!app.session.request_in_flight);
    }

    #[test]
    fn input_stays_cleared_when_the_turn_fails() {
        let mut app = authenticated_app();
        app.input = "question".to_string();
        assert!(app.submit().is_some());
        assert!(app.input.is_empty());

        app.resolve_answer(Err(anyhow!("connection refused")));
        assert!(app.input.is_empty());
    }

    #[test]
    fn earlier_log_entries_are_never_altered() {
        let mut app = authenticated_app();

        for turn in 0..3 {
            app.input = format!("question {turn}");
            assert!(app.submit().is_some());
            if turn == 1 {
                app.resolve_answer(Err(anyhow!("transient failure")));
            } else {
                app.resolve_answer(Ok(format!("answer {turn}")));
            }
        }

        assert_eq!(app.session.messages.len(), 7);
        assert_eq!(app.session.messages[0].content, GREETING);
        assert_eq!(app.session.messages[1].content, "question 0");
        assert_eq!(app.session.messages[2].content, "answer 0");
        assert_eq!(app.session.messages[4].content, ANSWER_FALLBACK);
    }

    #[test]
    fn begin_login_is_single_shot_until_it_resolves() {
        let mut app = logged_out_app();
        assert!(app.begin_login());
        assert_eq!(app.session.phase, AuthPhase::WaitingForBrowser);

        // Already waiting: a second trigger must not restart the flow.
        assert!(!app.begin_login());

        app.login_failed();
        assert_eq!(app.session.phase, AuthPhase::LoggedOut);
        assert_eq!(app.notice.as_deref(), Some(LOGIN_FAILED_NOTICE));
        assert!(app.begin_login());
    }
}
