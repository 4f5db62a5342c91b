use tracing::warn;

use sitesync::error::SyncError;
use sitesync::resources::service::fetch_resource;
use sitesync::resources::ResourceKind;

use crate::state::AppState;

pub async fn pull(state: &AppState, kind: ResourceKind) -> anyhow::Result<()> {
    match fetch_resource(&kind, &state.remote, &state.fallback).await {
        Ok(data) => {
            println!("{}: {}", kind, data.summary());
            Ok(())
        }
        Err(SyncError::CacheMiss { key, cause }) => {
            warn!(key = %key, cause = %cause, "Nothing to show");
            println!("{} is unavailable offline and has never been cached.", kind);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
