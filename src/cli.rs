//! Command-line front end.
//!
//! Each subcommand maps onto one operation of [`App`]; output is plain text
//! meant for a terminal.

use std::path::PathBuf;

use chrono::{Datelike, Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::error;

use crate::app::App;
use crate::auth::SignUpOutcome;
use crate::bundle::DEFAULT_BUNDLE_FILE;
use crate::calendar;
use crate::entities::{
    CalendarEvent, Decision, DiaryEntry, Task, TaskFilter, DEFAULT_EVENT_COLOR, EMOTIONS, MAX_RATING,
};
use crate::error::AppResult;

/// Offline-first organizer: tasks, emotion diary, decisions and calendar.
#[derive(Parser, Debug)]
#[command(name = "divergente", version)]
#[command(about = "Offline-first organizer with optional cloud sync")]
#[command(
    after_help = "Environment:\n  BACKEND_URL        Hosted backend base URL\n  BACKEND_ANON_KEY   Project API key\n  DATABASE_PATH      Local database file\n  SESSION_PATH       Stored session file\n  LOG_LEVEL          Log verbosity"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Reconcile every collection with the backend
    Sync {
        /// Keep running and deliver changes in the background until Ctrl-C
        #[arg(long)]
        watch: bool,
    },

    /// Manage the to-do list
    #[command(subcommand)]
    Tasks(TaskCommands),

    /// Manage the emotion diary
    #[command(subcommand)]
    Diary(DiaryCommands),

    /// Manage decision worksheets
    #[command(subcommand)]
    Decisions(DecisionCommands),

    /// Manage calendar events
    #[command(subcommand)]
    Events(EventCommands),

    /// List the national holidays of a year
    Holidays {
        /// Year to list
        year: i32,
    },

    /// Show or hide holidays in the calendar
    HolidaysToggle {
        /// New state
        state: Switch,
    },

    /// Write a JSON backup of all collections
    Export {
        /// Destination file
        #[arg(default_value = DEFAULT_BUNDLE_FILE)]
        path: PathBuf,
    },

    /// Restore collections from a JSON backup
    Import {
        /// Backup file
        path: PathBuf,
    },

    /// Account and session
    #[command(subcommand)]
    Auth(AuthCommands),

    /// Pending remote writes
    #[command(subcommand)]
    Outbox(OutboxCommands),
}

/// On/off switch argument.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

/// Task subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum TaskCommands {
    /// List tasks
    List {
        /// all, open or done
        #[arg(long, default_value = "all")]
        filter: TaskFilter,
    },
    /// Add a task
    Add {
        /// Task text
        text: String,
        /// Due day (yyyy-mm-dd)
        #[arg(long)]
        due: NaiveDate,
    },
    /// Mark a task done or open again
    Toggle {
        /// Task id
        id: String,
    },
    /// Delete a task
    Remove {
        /// Task id
        id: String,
    },
    /// Open tasks due today or earlier
    Today {
        /// Day to use instead of today (yyyy-mm-dd)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

/// Diary subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum DiaryCommands {
    /// List entries, newest first
    List,
    /// Write an entry
    Add {
        /// Entry text
        text: String,
        /// How you feel, e.g. "😌 calm"
        #[arg(long)]
        emotion: Option<String>,
    },
    /// Delete an entry
    Remove {
        /// Entry id
        id: String,
    },
    /// Show the emotion palette
    Emotions,
}

/// Decision subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum DecisionCommands {
    /// List saved decisions
    List,
    /// Save a decision worksheet
    Add {
        /// The problem being decided
        problem: String,
        /// Argument in favour, as "text" or "text:rating"
        #[arg(long = "pro")]
        pros: Vec<String>,
        /// Argument against, as "text" or "text:rating"
        #[arg(long = "con")]
        cons: Vec<String>,
        /// Closing reflection
        #[arg(long, default_value = "")]
        reflection: String,
    },
    /// Change the rating of one point
    Rate {
        /// Decision id
        id: String,
        /// Point id
        point: String,
        /// New rating (0-5)
        rating: u8,
    },
    /// Delete a decision
    Remove {
        /// Decision id
        id: String,
    },
}

/// Calendar subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum EventCommands {
    /// List events, optionally for one day
    List {
        /// Only this day (yyyy-mm-dd)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Add an event on one day or every day of a range
    Add {
        /// Event text
        text: String,
        /// First day (yyyy-mm-dd)
        #[arg(long)]
        start: NaiveDate,
        /// Last day, inclusive (defaults to start)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Colour as #rrggbb
        #[arg(long, default_value = DEFAULT_EVENT_COLOR)]
        color: String,
    },
    /// Delete an event
    Remove {
        /// Event id
        id: String,
    },
    /// Month view with holidays
    Month {
        /// Year
        year: i32,
        /// Month (1-12)
        month: u32,
    },
}

/// Account subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommands {
    /// Sign in with email and password
    SignIn {
        /// Account email
        email: String,
        /// Account password
        #[arg(long)]
        password: String,
    },
    /// Create an account
    SignUp {
        /// Your name
        #[arg(long)]
        name: String,
        /// Account email
        email: String,
        /// Password (at least 6 characters)
        #[arg(long)]
        password: String,
    },
    /// Sign out and forget the stored session
    SignOut,
    /// Show who is signed in
    Status,
    /// Send a password reset email
    ResetPassword {
        /// Account email
        email: String,
    },
    /// Permanently delete the account and all data
    DeleteAccount {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

/// Outbox subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum OutboxCommands {
    /// List pending remote writes
    Status,
    /// Try to deliver pending writes now
    Flush,
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

fn finish<T>(result: AppResult<T>, render: impl FnOnce(T) -> String) -> CliResult {
    match result {
        Ok(value) => CliResult::success(render(value)),
        Err(e) => CliResult::error(format!("Error: {}", e)),
    }
}

/// Split `"text:rating"` into its parts. A missing or non-numeric rating
/// leaves the whole argument as text with rating 0.
pub fn parse_point(raw: &str) -> (String, u8) {
    if let Some((text, rating)) = raw.rsplit_once(':') {
        if let Ok(rating) = rating.trim().parse::<u8>() {
            return (text.trim().to_string(), rating.min(MAX_RATING));
        }
    }
    (raw.trim().to_string(), 0)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn render_task(task: &Task) -> String {
    let mark = if task.completed { "x" } else { " " };
    let due = task
        .due_date
        .as_deref()
        .map(|d| format!(" (due {})", d))
        .unwrap_or_default();
    format!("[{}] {}  {}{}", mark, task.id, task.text, due)
}

fn render_entry(entry: &DiaryEntry) -> String {
    let emotion = entry
        .emotion
        .as_deref()
        .map(|e| format!(" {}", e))
        .unwrap_or_default();
    format!("{}  {}{}\n    {}", entry.id, entry.created_at, emotion, entry.text)
}

fn render_decision(decision: &Decision) -> String {
    let (pro, con) = decision.scores();
    let mut out = format!(
        "{}  {}  [{}: {} vs {}]",
        decision.id, decision.problem, decision.overall_sentiment, pro, con
    );
    for point in &decision.positive_points {
        out.push_str(&format!("\n    + {} ({}/{}) [{}]", point.text, point.rating, MAX_RATING, point.id));
    }
    for point in &decision.negative_points {
        out.push_str(&format!("\n    - {} ({}/{}) [{}]", point.text, point.rating, MAX_RATING, point.id));
    }
    if !decision.reflection.is_empty() {
        out.push_str(&format!("\n    reflection: {}", decision.reflection));
    }
    out
}

fn render_event(event: &CalendarEvent) -> String {
    format!("{}  {}  {} ({})", event.date, event.id, event.text, event.color)
}

fn render_list<T>(items: &[T], empty: &str, render: fn(&T) -> String) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    items.iter().map(render).collect::<Vec<_>>().join("\n")
}

/// Execute a CLI command against the application.
pub async fn execute_command(command: Commands, app: &mut App) -> CliResult {
    match command {
        Commands::Sync { watch } => execute_sync(app, watch).await,
        Commands::Tasks(cmd) => execute_tasks(app, cmd).await,
        Commands::Diary(cmd) => execute_diary(app, cmd).await,
        Commands::Decisions(cmd) => execute_decisions(app, cmd).await,
        Commands::Events(cmd) => execute_events(app, cmd).await,
        Commands::Holidays { year } => execute_holidays(year),
        Commands::HolidaysToggle { state } => {
            let enabled = state == Switch::On;
            finish(app.set_holidays_enabled(enabled).await, |_| {
                format!("Holidays {}", if enabled { "shown" } else { "hidden" })
            })
        }
        Commands::Export { path } => finish(app.export(&path).await, |_| {
            format!("Backup written to {}", path.display())
        }),
        Commands::Import { path } => finish(app.import(&path).await, |sections| {
            if sections.is_empty() {
                "Backup contained no known sections".to_string()
            } else {
                format!("Restored: {}", sections.join(", "))
            }
        }),
        Commands::Auth(cmd) => execute_auth(app, cmd).await,
        Commands::Outbox(cmd) => execute_outbox(app, cmd).await,
    }
}

async fn execute_sync(app: &mut App, keep_running: bool) -> CliResult {
    if !app.is_signed_in().await {
        return CliResult::error("Not signed in; run `divergente auth sign-in` first");
    }

    let summary = match app.sync_all().await {
        Ok(summary) => summary,
        Err(e) => return CliResult::error(format!("Error: {}", e)),
    };
    let mut message = format!(
        "Synced {} tasks, {} diary entries, {} decisions, {} events",
        summary.tasks, summary.diary, summary.decisions, summary.events
    );

    if keep_running {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let Some(handle) = app.spawn_worker(shutdown_rx) else {
            return CliResult::error("Sync worker already running");
        };
        eprintln!("Watching for changes, press Ctrl-C to stop");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
        let _ = shutdown_tx.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "Sync worker panicked");
        }
        message.push_str("\nSync worker stopped");
    }

    CliResult::success(message)
}

async fn execute_tasks(app: &App, cmd: TaskCommands) -> CliResult {
    match cmd {
        TaskCommands::List { filter } => finish(app.tasks.filtered(filter).await, |tasks| {
            render_list(&tasks, "No tasks", render_task)
        }),
        TaskCommands::Add { text, due } => finish(app.tasks.add_task(&text, due).await, |task| {
            format!("Added {}", render_task(&task))
        }),
        TaskCommands::Toggle { id } => finish(app.tasks.toggle(&id).await, |task| render_task(&task)),
        TaskCommands::Remove { id } => finish(app.tasks.remove(&id).await, |task| {
            format!("Removed task {}", task.id)
        }),
        TaskCommands::Today { date } => {
            let day = date.unwrap_or_else(today);
            finish(app.tasks.due_on_or_before(day).await, |tasks| {
                render_list(&tasks, "Nothing due", render_task)
            })
        }
    }
}

async fn execute_diary(app: &App, cmd: DiaryCommands) -> CliResult {
    match cmd {
        DiaryCommands::List => finish(app.diary.list().await, |entries| {
            render_list(&entries, "No diary entries", render_entry)
        }),
        DiaryCommands::Add { text, emotion } => {
            finish(app.diary.add_entry(&text, emotion).await, |entry| {
                format!("Added {}", render_entry(&entry))
            })
        }
        DiaryCommands::Remove { id } => finish(app.diary.remove(&id).await, |entry| {
            format!("Removed entry {}", entry.id)
        }),
        DiaryCommands::Emotions => CliResult::success(EMOTIONS.join("\n")),
    }
}

async fn execute_decisions(app: &App, cmd: DecisionCommands) -> CliResult {
    match cmd {
        DecisionCommands::List => finish(app.decisions.list().await, |decisions| {
            render_list(&decisions, "No decisions", render_decision)
        }),
        DecisionCommands::Add {
            problem,
            pros,
            cons,
            reflection,
        } => {
            let pros: Vec<(String, u8)> = pros.iter().map(|p| parse_point(p)).collect();
            let cons: Vec<(String, u8)> = cons.iter().map(|p| parse_point(p)).collect();
            finish(
                app.decisions
                    .add_decision(&problem, &pros, &cons, &reflection)
                    .await,
                |decision| format!("Saved {}", render_decision(&decision)),
            )
        }
        DecisionCommands::Rate { id, point, rating } => finish(
            app.decisions.rate_point(&id, &point, rating).await,
            |decision| render_decision(&decision),
        ),
        DecisionCommands::Remove { id } => finish(app.decisions.remove(&id).await, |decision| {
            format!("Removed decision {}", decision.id)
        }),
    }
}

async fn execute_events(app: &App, cmd: EventCommands) -> CliResult {
    match cmd {
        EventCommands::List { date: Some(day) } => finish(app.events.on_date(day).await, |events| {
            render_list(&events, "No events", render_event)
        }),
        EventCommands::List { date: None } => finish(app.events.list().await, |events| {
            render_list(&events, "No events", render_event)
        }),
        EventCommands::Add {
            text,
            start,
            end,
            color,
        } => {
            let end = end.unwrap_or(start);
            finish(app.events.add_range(start, end, &text, &color).await, |events| {
                format!("Added\n{}", render_list(&events, "", render_event))
            })
        }
        EventCommands::Remove { id } => finish(app.events.remove(&id).await, |event| {
            format!("Removed event {}", event.id)
        }),
        EventCommands::Month { year, month } => finish(app.month(year, month).await, |days| {
            let mut out = String::new();
            for day in days {
                if day.holiday.is_none() && day.events.is_empty() {
                    continue;
                }
                out.push_str(&format!("{} {}", day.date, day.date.weekday()));
                if let Some(name) = day.holiday {
                    out.push_str(&format!("  * {}", name));
                }
                out.push('\n');
                for event in &day.events {
                    out.push_str(&format!("    {} ({})\n", event.text, event.color));
                }
            }
            if out.is_empty() {
                format!("Nothing in {}-{:02}", year, month)
            } else {
                out.trim_end().to_string()
            }
        }),
    }
}

fn execute_holidays(year: i32) -> CliResult {
    let holidays = calendar::holidays_for_year(year);
    if holidays.is_empty() {
        return CliResult::error(format!("No holidays for year {}", year));
    }
    CliResult::success(
        holidays
            .iter()
            .map(|h| format!("{}  {}", h.date, h.name))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

async fn execute_auth(app: &App, cmd: AuthCommands) -> CliResult {
    match cmd {
        AuthCommands::SignIn { email, password } => {
            finish(app.auth.sign_in(&email, &password).await, |user| {
                format!("Signed in as {}", user.email.as_deref().unwrap_or(&user.id))
            })
        }
        AuthCommands::SignUp {
            name,
            email,
            password,
        } => finish(app.auth.sign_up(&name, &email, &password).await, |outcome| {
            match outcome {
                SignUpOutcome::SignedIn(user) => format!("Account created, signed in as {}", user.id),
                SignUpOutcome::ConfirmationPending => {
                    "Account created; check your email to confirm it".to_string()
                }
            }
        }),
        AuthCommands::SignOut => finish(app.auth.sign_out().await, |_| "Signed out".to_string()),
        AuthCommands::Status => match app.auth.current_user().await {
            Some(user) => {
                let name = user.full_name().map(|n| format!(" ({})", n)).unwrap_or_default();
                CliResult::success(format!(
                    "Signed in as {}{} [{}]",
                    user.email.as_deref().unwrap_or("unknown email"),
                    name,
                    user.id
                ))
            }
            None => CliResult::success("Not signed in"),
        },
        AuthCommands::ResetPassword { email } => finish(app.auth.reset_password(&email).await, |_| {
            format!("Password reset email sent to {}", email.trim())
        }),
        AuthCommands::DeleteAccount { yes } => {
            if !yes {
                return CliResult::error(
                    "This deletes the account and all its data; pass --yes to confirm",
                );
            }
            finish(app.delete_account().await, |_| "Account deleted".to_string())
        }
    }
}

async fn execute_outbox(app: &App, cmd: OutboxCommands) -> CliResult {
    match cmd {
        OutboxCommands::Status => finish(app.queue.pending().await.map_err(Into::into), |pending| {
            if pending.is_empty() {
                return "Outbox empty".to_string();
            }
            let mut out = format!("{} pending\n", pending.len());
            for record in &pending {
                out.push_str(&format!(
                    "  {} {} {} attempts={}",
                    record.op, record.remote_table, record.entity_id, record.attempts
                ));
                if let Some(err) = &record.last_error {
                    out.push_str(&format!(" last_error={}", err));
                }
                out.push('\n');
            }
            out.trim_end().to_string()
        }),
        OutboxCommands::Flush => finish(app.flush().await, |report| {
            let mut out = format!(
                "Delivered {}, rescheduled {}, dropped {}",
                report.delivered, report.rescheduled, report.dropped
            );
            if report.deferred {
                out.push_str(" (not signed in, remaining writes kept)");
            }
            out
        }),
    }
}
