use assignsync_core::{ConflictPolicy, ResolutionChoice, ResolutionStatus};
use clap::Subcommand;

use super::{print_json, CmdResult, Context};

#[derive(Subcommand)]
pub enum ConflictAction {
    /// List conflicts (pending only unless --all)
    List {
        #[arg(long)]
        all: bool,
    },
    /// Show one conflict with both snapshots
    Show {
        /// Conflict ID
        id: String,
    },
    /// Resolve a conflict
    Resolve {
        /// Conflict ID
        id: String,
        /// local, remote or merge
        #[arg(value_parser = parse_choice)]
        choice: ResolutionChoice,
    },
    /// Close a conflict without changing either side
    Ignore {
        /// Conflict ID
        id: String,
    },
    /// Resolve every pending conflict with a policy
    Auto {
        /// calendar_wins, assignment_wins or newest_wins (default: from config)
        #[arg(long, value_parser = parse_policy)]
        policy: Option<ConflictPolicy>,
    },
}

fn parse_choice(raw: &str) -> Result<ResolutionChoice, String> {
    ResolutionChoice::parse(raw).ok_or_else(|| format!("unknown choice '{raw}' (local, remote, merge)"))
}

fn parse_policy(raw: &str) -> Result<ConflictPolicy, String> {
    ConflictPolicy::parse(raw).ok_or_else(|| {
        format!("unknown policy '{raw}' (manual, calendar_wins, assignment_wins, newest_wins)")
    })
}

pub async fn run(action: ConflictAction) -> CmdResult {
    let ctx = Context::open()?;
    let conflicts = ctx.service().conflicts();
    match action {
        ConflictAction::List { all } => {
            let status = (!all).then_some(ResolutionStatus::Pending);
            print_json(&conflicts.list(status)?)?;
        }
        ConflictAction::Show { id } => {
            print_json(&conflicts.get(&id)?)?;
        }
        ConflictAction::Resolve { id, choice } => {
            let closed = conflicts.resolve(&id, choice).await?;
            println!("Conflict resolved: {}", closed.id);
        }
        ConflictAction::Ignore { id } => {
            let closed = conflicts.ignore(&id).await?;
            println!("Conflict ignored: {}", closed.id);
        }
        ConflictAction::Auto { policy } => {
            let policy = policy.unwrap_or(ctx.config.sync.conflict_policy);
            if policy == ConflictPolicy::Manual {
                return Err("no automatic policy configured; pass --policy".into());
            }
            let resolved = conflicts.auto_resolve_pending(policy).await?;
            println!("{resolved} conflict(s) resolved");
        }
    }
    Ok(())
}
