use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};

use nudge::config::NudgeConfig;
use nudge::core::calendar::CalendarWindow;
use nudge::core::task::{NewTask, Task, TaskId};
use nudge::reminder::{
    MemoryAlarmService, ReminderScheduler, ReminderZone, ScheduleOutcome, SkipReason, SystemClock,
};
use nudge::service::TaskService;
use nudge::settings::{BackgroundTheme, SettingsStore};
use nudge::store::{SqliteTaskStore, TaskStore};

#[derive(Parser)]
#[command(name = "nudge", version, about = "Dated to-do list with local reminders")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a task
    Add {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, value_parser = parse_time)]
        time: Option<NaiveTime>,
        /// Minutes before the task time to remind
        #[arg(long)]
        remind: Option<u32>,
        #[arg(long)]
        important: bool,
    },
    /// List tasks, all of them or those due on one date
    List {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Change fields of a task
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, value_parser = parse_time)]
        time: Option<NaiveTime>,
        #[arg(long)]
        remind: Option<u32>,
        #[arg(long)]
        clear_reminder: bool,
        #[arg(long)]
        clear_date: bool,
    },
    /// Delete a task and its reminder
    Delete { id: i64 },
    /// Flip the importance flag
    Important { id: i64 },
    /// Show a month of the two-year calendar (YYYY-MM)
    Calendar {
        #[arg(long, value_parser = parse_month)]
        month: Option<NaiveDate>,
    },
    /// Show or set the background theme
    Theme { name: Option<String> },
    /// Turn debug logging on or off
    DebugLogging {
        #[arg(
            action = clap::ArgAction::Set,
            value_parser = clap::builder::BoolishValueParser::new()
        )]
        enabled: bool,
    },
    /// Restore reminders and deliver them until interrupted
    Run,
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| format!("expected HH:MM: {}", e))
}

fn parse_month(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM: {}", e))
}

fn init_logging() {
    // Log to the systemd user journal (`journalctl --user -t nudge -f`).
    // Wrapper filters: nudge crate at info/debug (per settings), everything else at warn.
    struct FilteredJournal {
        inner: systemd_journal_logger::JournalLog,
    }

    impl log::Log for FilteredJournal {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            if metadata.target().starts_with("nudge") {
                let max = if nudge::debug_logging() {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                };
                metadata.level() <= max
            } else {
                metadata.level() <= log::LevelFilter::Warn
            }
        }
        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.inner.log(record);
            }
        }
        fn flush(&self) {
            self.inner.flush();
        }
    }

    let journal = match systemd_journal_logger::JournalLog::new() {
        Ok(journal) => journal.with_syslog_identifier("nudge".to_string()),
        Err(e) => {
            eprintln!("journal logging unavailable: {}", e);
            return;
        }
    };
    if log::set_boxed_logger(Box::new(FilteredJournal { inner: journal })).is_ok() {
        // Global max must be Debug so nudge debug logs can pass through when toggled
        log::set_max_level(log::LevelFilter::Debug);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(NudgeConfig::default_path);
    let config = NudgeConfig::load_or_default(&config_path);
    config.ensure_dirs()?;

    let settings = SettingsStore::open(&config.settings_path());
    nudge::set_debug_logging(settings.snapshot().debug_logging);
    init_logging();

    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open(&config.database_path())?);

    if let Command::Run = cli.command {
        nudge::runtime::run_daemon(&config, store).await?;
        return Ok(());
    }

    // One-shot commands record registrations without arming anything;
    // `nudge run` picks the task up on its next rescan.
    let zone = config.zone();
    let scheduler = ReminderScheduler::new(
        Arc::new(MemoryAlarmService::new()),
        Arc::new(SystemClock),
        zone,
    );
    let service = TaskService::new(store, Arc::new(scheduler));

    match cli.command {
        Command::Add {
            title,
            description,
            date,
            time,
            remind,
            important,
        } => {
            let draft = NewTask {
                title,
                description,
                important,
                due_date: date,
                reminder_minutes_before: remind,
                task_time: time,
            };
            let (task, outcome) = service.create(draft)?;
            println!("Created #{}", task.id);
            print_outcome(&outcome, zone);
        }
        Command::List { date } => {
            let tasks = match date {
                Some(date) => service.tasks_on(date)?,
                None => service.all()?,
            };
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in &tasks {
                println!("{}", format_task(task));
            }
        }
        Command::Edit {
            id,
            title,
            description,
            date,
            time,
            remind,
            clear_reminder,
            clear_date,
        } => {
            let (task, outcome) = service.edit(TaskId(id), |t| {
                if let Some(title) = title {
                    t.title = title;
                }
                if let Some(description) = description {
                    t.description = description;
                }
                if date.is_some() {
                    t.due_date = date;
                }
                if time.is_some() {
                    t.task_time = time;
                }
                if remind.is_some() {
                    t.reminder_minutes_before = remind;
                }
                if clear_date {
                    t.due_date = None;
                }
                if clear_reminder {
                    t.clear_reminder();
                }
            })?;
            println!("{}", format_task(&task));
            print_outcome(&outcome, zone);
        }
        Command::Delete { id } => {
            if service.delete(TaskId(id))? {
                println!("Deleted #{}", id);
            } else {
                println!("No task #{}", id);
            }
        }
        Command::Important { id } => {
            let task = service.toggle_important(TaskId(id))?;
            println!("{}", format_task(&task));
        }
        Command::Calendar { month } => {
            let today = chrono::Local::now().date_naive();
            let mut window = CalendarWindow::around(today);
            if let Some(month) = month {
                if !window.contains(month) {
                    let month = month.format("%Y-%m");
                    return Err(format!("{} is outside the calendar window", month).into());
                }
                window.show(month);
            }
            let tasks = service.tasks_between(window.start(), window.end())?;
            print_month(&window, &tasks, today);
        }
        Command::Theme { name } => match name {
            Some(name) => {
                let theme = BackgroundTheme::parse(&name).ok_or_else(|| {
                    let names: Vec<&str> =
                        BackgroundTheme::ALL.iter().map(|t| t.as_str()).collect();
                    format!("unknown theme '{}', expected one of: {}", name, names.join(", "))
                })?;
                settings.update(|s| s.theme = theme)?;
                println!("Theme set to {}", theme);
            }
            None => println!("{}", settings.snapshot().theme),
        },
        Command::DebugLogging { enabled } => {
            settings.update(|s| s.debug_logging = enabled)?;
            nudge::set_debug_logging(enabled);
            println!("Debug logging {}", if enabled { "on" } else { "off" });
        }
        Command::Run => {}
    }

    Ok(())
}

fn format_instant(instant: DateTime<Utc>, zone: ReminderZone) -> String {
    const FORMAT: &str = "%Y-%m-%d %H:%M";
    match zone {
        ReminderZone::Local => instant.with_timezone(&chrono::Local).format(FORMAT).to_string(),
        ReminderZone::Fixed(offset) => instant.with_timezone(&offset).format(FORMAT).to_string(),
    }
}

fn print_outcome(outcome: &ScheduleOutcome, zone: ReminderZone) {
    match outcome {
        ScheduleOutcome::Scheduled { trigger_at } => println!(
            "Reminder at {} (armed by `nudge run`)",
            format_instant(*trigger_at, zone)
        ),
        ScheduleOutcome::Skipped(SkipReason::MissingFields) => {}
        ScheduleOutcome::Skipped(SkipReason::Stale { trigger_at }) => println!(
            "Reminder time {} has already passed",
            format_instant(*trigger_at, zone)
        ),
        ScheduleOutcome::Skipped(SkipReason::UnresolvableTime) => {
            println!("Reminder time does not exist in the local time zone")
        }
        ScheduleOutcome::Denied => println!("Exact alarms are disabled, no reminder will fire"),
        ScheduleOutcome::Invalid(id) => println!("Task id {} cannot carry a reminder", id),
        ScheduleOutcome::Failed(e) => println!("Reminder not set: {}", e),
    }
}

fn format_task(task: &Task) -> String {
    let mut line = format!("#{:<4}{} ", task.id, if task.important { "!" } else { " " });
    match task.due_date {
        Some(date) => line.push_str(&date.format("%Y-%m-%d").to_string()),
        None => line.push_str("          "),
    }
    match task.task_time {
        Some(time) => line.push_str(&time.format(" %H:%M").to_string()),
        None => line.push_str("      "),
    }
    line.push_str("  ");
    line.push_str(&task.title);
    if let Some(minutes) = task.reminder_minutes_before {
        line.push_str(&format!("  (remind {}m before)", minutes));
    }
    if !task.description.is_empty() {
        line.push_str(&format!("\n        {}", task.description));
    }
    line
}

fn print_month(window: &CalendarWindow, tasks: &[Task], today: NaiveDate) {
    let month = window.displayed();
    let busy = window.busy_days(tasks);

    println!("{:^28}", month.label());
    println!(" Mo  Tu  We  Th  Fr  Sa  Su");
    for week in &month.weeks {
        let mut row = String::new();
        for day in week {
            match day {
                Some(date) => {
                    let mark = if *date == today {
                        '>'
                    } else if busy.contains(date) {
                        '*'
                    } else {
                        ' '
                    };
                    row.push_str(&format!("{}{:>2} ", mark, date.day()));
                }
                None => row.push_str("    "),
            }
        }
        println!("{}", row.trim_end());
    }

    let mut in_month: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.due_date.is_some_and(|d| month.days().any(|m| m == d)))
        .collect();
    in_month.sort_by_key(|t| (t.due_date, t.task_time, t.id));
    if !in_month.is_empty() {
        println!();
        for task in in_month {
            println!("{}", format_task(task));
        }
    }
}
