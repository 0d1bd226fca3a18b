//! Assignment management commands for CLI.

use assignsync_core::model::Frequency;
use assignsync_core::{Assignment, AssignmentCategory, RecurrenceRule, Reminder};
use chrono::Duration;
use clap::{Args, Subcommand};

use super::{parse_category, parse_time, print_json, CmdResult, Context};

#[derive(Subcommand)]
pub enum AssignmentAction {
    /// Create an assignment and push it to the calendar
    Add {
        /// Title without the course prefix
        title: String,
        /// Start (or due) time
        #[arg(long)]
        start: String,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// List assignments
    List {
        /// Filter by category
        #[arg(long, value_parser = parse_category)]
        category: Option<AssignmentCategory>,
        /// Filter by course code
        #[arg(long)]
        course: Option<String>,
        /// Include completed items
        #[arg(long)]
        all: bool,
    },
    /// Show one assignment
    Show {
        /// Assignment ID
        id: String,
    },
    /// Update an assignment
    Update {
        /// Assignment ID
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New start time
        #[arg(long)]
        start: Option<String>,
        /// Set completed status
        #[arg(long)]
        completed: Option<bool>,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Mark an assignment completed
    Complete {
        /// Assignment ID
        id: String,
    },
    /// Delete an assignment and its calendar event
    Delete {
        /// Assignment ID
        id: String,
    },
}

/// Optional fields shared by `add` and `update`.
#[derive(Args)]
pub struct FieldArgs {
    /// End time
    #[arg(long)]
    end: Option<String>,
    /// Course code, shown as the event title prefix
    #[arg(long)]
    course: Option<String>,
    #[arg(long, value_parser = parse_category)]
    category: Option<AssignmentCategory>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    location: Option<String>,
    /// IANA timezone for wall-clock times
    #[arg(long)]
    timezone: Option<String>,
    /// Popup reminder, minutes before start (repeatable)
    #[arg(long = "remind", value_name = "MINUTES")]
    reminders: Vec<u32>,
    /// Repeat: daily, weekly, monthly or yearly
    #[arg(long, value_parser = parse_frequency)]
    repeat: Option<Frequency>,
    /// Repeat every N periods
    #[arg(long, default_value = "1", requires = "repeat")]
    every: u32,
    /// Number of occurrences
    #[arg(long, requires = "repeat")]
    count: Option<u32>,
}

fn parse_frequency(raw: &str) -> Result<Frequency, String> {
    match raw.to_ascii_lowercase().as_str() {
        "daily" => Ok(Frequency::Daily),
        "weekly" => Ok(Frequency::Weekly),
        "monthly" => Ok(Frequency::Monthly),
        "yearly" => Ok(Frequency::Yearly),
        _ => Err(format!("unknown repeat '{raw}' (daily, weekly, monthly, yearly)")),
    }
}

impl FieldArgs {
    fn apply(self, item: &mut Assignment) -> CmdResult {
        if let Some(tz) = self.timezone {
            item.timezone = tz;
        }
        if let Some(end) = self.end {
            item.end_time = Some(parse_time(&end, &item.timezone)?.0);
        }
        if let Some(course) = self.course {
            item.course = Some(course).filter(|c| !c.is_empty());
        }
        if let Some(category) = self.category {
            item.category = category;
        }
        if let Some(description) = self.description {
            item.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(location) = self.location {
            item.location = Some(location).filter(|l| !l.is_empty());
        }
        if !self.reminders.is_empty() {
            item.reminders = self.reminders.into_iter().map(Reminder::popup).collect();
        }
        if let Some(frequency) = self.repeat {
            let mut rule = RecurrenceRule::new(frequency);
            rule.interval = self.every;
            rule.count = self.count;
            item.recurrence = Some(rule);
        }
        Ok(())
    }
}

fn set_start(item: &mut Assignment, raw: &str) -> CmdResult {
    let (start, all_day) = parse_time(raw, &item.timezone)?;
    item.start_time = start;
    item.all_day = all_day;
    if all_day && item.end_time.is_none() {
        item.end_time = Some(start + Duration::days(1));
    }
    Ok(())
}

pub async fn run(action: AssignmentAction) -> CmdResult {
    match action {
        AssignmentAction::Add {
            title,
            start,
            fields,
        } => {
            let ctx = Context::open()?;
            let mut item = Assignment::new(title, chrono::Utc::now());
            if let Some(tz) = &fields.timezone {
                item.timezone = tz.clone();
            }
            set_start(&mut item, &start)?;
            fields.apply(&mut item)?;
            let saved = ctx.service().save_assignment(item).await?;
            println!("Assignment created: {}", saved.id);
            print_json(&saved)?;
        }
        AssignmentAction::List {
            category,
            course,
            all,
        } => {
            let ctx = Context::open()?;
            let items: Vec<_> = ctx
                .db
                .list_assignments()?
                .into_iter()
                .filter(|i| all || !i.completed)
                .filter(|i| category.map_or(true, |c| i.category == c))
                .filter(|i| course.as_ref().map_or(true, |c| i.course.as_ref() == Some(c)))
                .collect();
            print_json(&items)?;
        }
        AssignmentAction::Show { id } => {
            let ctx = Context::open()?;
            let item = ctx
                .db
                .get_assignment(&id)?
                .filter(|i| !i.is_deleted())
                .ok_or(format!("Assignment not found: {id}"))?;
            print_json(&item)?;
        }
        AssignmentAction::Update {
            id,
            title,
            start,
            completed,
            fields,
        } => {
            let ctx = Context::open()?;
            let mut item = ctx
                .db
                .get_assignment(&id)?
                .filter(|i| !i.is_deleted())
                .ok_or(format!("Assignment not found: {id}"))?;
            if let Some(t) = title {
                item.title = t;
            }
            if let Some(tz) = &fields.timezone {
                item.timezone = tz.clone();
            }
            if let Some(s) = start {
                set_start(&mut item, &s)?;
            }
            if let Some(c) = completed {
                item.completed = c;
            }
            fields.apply(&mut item)?;
            let saved = ctx.service().save_assignment(item).await?;
            println!("Assignment updated:");
            print_json(&saved)?;
        }
        AssignmentAction::Complete { id } => {
            let ctx = Context::open()?;
            let mut item = ctx
                .db
                .get_assignment(&id)?
                .filter(|i| !i.is_deleted())
                .ok_or(format!("Assignment not found: {id}"))?;
            item.completed = true;
            let saved = ctx.service().save_assignment(item).await?;
            println!("Assignment completed: {}", saved.id);
        }
        AssignmentAction::Delete { id } => {
            let ctx = Context::open()?;
            ctx.service().delete_assignment(&id).await?;
            println!("Assignment deleted: {id}");
        }
    }
    Ok(())
}
