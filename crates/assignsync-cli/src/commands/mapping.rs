use assignsync_core::EventMappingService;
use clap::Subcommand;

use super::{print_json, CmdResult, Context};

#[derive(Subcommand)]
pub enum MappingAction {
    /// List links for the configured provider
    List,
    /// Forget the link of one assignment
    Unlink {
        /// Assignment ID
        id: String,
    },
}

pub async fn run(action: MappingAction) -> CmdResult {
    let ctx = Context::open()?;
    match action {
        MappingAction::List => {
            let mappings = EventMappingService::new(&ctx.db).list_for_provider(ctx.config.sync.provider)?;
            print_json(&mappings)?;
        }
        MappingAction::Unlink { id } => {
            let item = ctx.service().unlink(&id).await?;
            println!("Assignment unlinked: {}", item.id);
        }
    }
    Ok(())
}
