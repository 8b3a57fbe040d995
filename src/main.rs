use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod app;
mod auth;
mod backend;
mod config;
mod handler;
mod tui;
mod ui;

use app::{App, PendingRequest, RequestKind};
use auth::CapturedAddress;
use config::Config;
use tui::{AppEvent, EventHandler, Tui};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging();

    let config = Config::load().unwrap_or_else(|_| Config::new());
    // First run leaves a template the user can fill in
    let _ = config.save();

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut app = App::new(&config);
    let result = run(&mut terminal, &mut app).await;

    tui::restore()?;
    result
}

/// The TUI owns stderr, so diagnostics go to a file under the config dir.
fn init_logging() -> Option<WorkerGuard> {
    let log_dir = dirs::config_dir()?.join("stravify");
    std::fs::create_dir_all(&log_dir).ok()?;

    let appender = tracing_appender::rolling::never(log_dir, "stravify.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Some(guard)
}

enum Step {
    Event(AppEvent),
    Resolved(RequestKind, Result<String>),
    Closed,
}

async fn run(terminal: &mut Tui, app: &mut App) -> Result<()> {
    let mut events = EventHandler::new();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        let step = tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(event) => Step::Event(event),
                None => Step::Closed,
            },
            (kind, result) = join_pending(&mut app.pending) => Step::Resolved(kind, result),
        };

        match step {
            Step::Closed => break,
            Step::Event(event) => handler::handle_event(app, event),
            Step::Resolved(kind, result) => resolve_request(app, kind, result),
        }
    }

    Ok(())
}

/// Await the single pending task, or park forever when there is none.
/// Polling is cancel-safe: the slot is cleared only after the join completes.
async fn join_pending(slot: &mut Option<PendingRequest>) -> (RequestKind, Result<String>) {
    match slot {
        Some(pending) => {
            let kind = pending.kind;
            let joined = (&mut pending.handle).await;
            *slot = None;
            let result = match joined {
                Ok(result) => result,
                Err(err) => Err(anyhow::anyhow!("request task failed: {err}")),
            };
            (kind, result)
        }
        None => std::future::pending().await,
    }
}

fn resolve_request(app: &mut App, kind: RequestKind, result: Result<String>) {
    match kind {
        RequestKind::CaptureRedirect => match result {
            Ok(address) => {
                let mut captured = CapturedAddress::new(address);
                match auth::detect_incoming_code(&mut captured) {
                    Some(code) => {
                        // begin_exchange refuses once authenticated, so a
                        // stale code is dropped here
                        if app.begin_exchange() {
                            let backend = app.backend.clone();
                            app.pending = Some(PendingRequest {
                                kind: RequestKind::Exchange,
                                handle: tokio::spawn(async move {
                                    backend.exchange_code(&code).await
                                }),
                            });
                        }
                    }
                    None => {
                        tracing::warn!("redirect arrived without a usable authorization code");
                        app.login_failed();
                    }
                }
            }
            Err(err) => {
                tracing::warn!("authorization redirect capture failed: {err:#}");
                app.login_failed();
            }
        },
        RequestKind::Exchange => app.resolve_exchange(result),
        RequestKind::Answer => app.resolve_answer(result),
    }
}
