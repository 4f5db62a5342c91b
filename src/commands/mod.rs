mod manage;
mod migrate;
mod pull;

use clap::{Subcommand, ValueEnum};

use sitesync::resources::ResourceKind;

use crate::state::AppState;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load a resource, remote first, cached copy when offline
    Pull {
        resource: ResourceArg,
        /// Project id, required for project-scoped resources
        #[arg(long)]
        project: Option<String>,
    },
    /// Upload inline annotation assets and rewrite their references
    Migrate {
        #[arg(required = true, num_args = 1..)]
        projects: Vec<String>,
    },
    /// Show how much of the storage quota is in use
    Usage,
    /// Drop every volatile (temp, cache, draft) entry
    Sweep,
    /// Show one cached entry
    Inspect { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceArg {
    Projects,
    Clients,
    TeamMembers,
    CompanySettings,
    Planning,
    Descriptif,
    Annotations,
}

impl ResourceArg {
    pub fn kind(self, project: Option<String>) -> anyhow::Result<ResourceKind> {
        let scoped = |make: fn(String) -> ResourceKind| {
            project
                .clone()
                .filter(|p| !p.is_empty())
                .map(make)
                .ok_or_else(|| anyhow::anyhow!("`{:?}` needs --project <id>", self))
        };
        match self {
            ResourceArg::Projects => Ok(ResourceKind::Projects),
            ResourceArg::Clients => Ok(ResourceKind::Clients),
            ResourceArg::TeamMembers => Ok(ResourceKind::TeamMembers),
            ResourceArg::CompanySettings => Ok(ResourceKind::CompanySettings),
            ResourceArg::Planning => scoped(ResourceKind::Planning),
            ResourceArg::Descriptif => scoped(ResourceKind::Descriptif),
            ResourceArg::Annotations => scoped(ResourceKind::Annotations),
        }
    }
}

pub async fn run(command: Command, state: &AppState) -> anyhow::Result<()> {
    match command {
        Command::Pull { resource, project } => pull::pull(state, resource.kind(project)?).await,
        Command::Migrate { projects } => migrate::migrate(state, &projects).await,
        Command::Usage => manage::usage(state).await,
        Command::Sweep => manage::sweep(state).await,
        Command::Inspect { key } => manage::inspect(state, &key).await,
    }
}
