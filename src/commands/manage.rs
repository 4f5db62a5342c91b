use sitesync::resources::{ResourceData, ResourceKind};

use crate::state::AppState;

pub async fn usage(state: &AppState) -> anyhow::Result<()> {
    let usage = state.store.usage().await;
    println!(
        "{}: {} / {} bytes ({:.1}%) across {} entries, {} bytes volatile",
        state.config.data_dir.display(),
        usage.used_bytes,
        usage.ceiling,
        usage.percent_used(),
        usage.entries,
        usage.volatile_bytes
    );
    Ok(())
}

pub async fn sweep(state: &AppState) -> anyhow::Result<()> {
    let removed = state.store.sweep_volatile().await?;
    if removed.is_empty() {
        println!("No volatile entries.");
    } else {
        println!("Removed {} volatile entries:", removed.len());
        for key in removed {
            println!("  {}", key);
        }
    }
    Ok(())
}

pub async fn inspect(state: &AppState, key: &str) -> anyhow::Result<()> {
    let Some(info) = state.store.entry_info(key).await else {
        println!("`{}` is not cached.", key);
        return Ok(());
    };
    let written = info
        .written_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "at an unknown time".to_string());
    println!("`{}`: {} bytes, written {}", key, info.size, written);

    let Some(kind) = ResourceKind::from_cache_key(key) else {
        println!("  untyped entry");
        return Ok(());
    };
    let Some(raw) = state.store.get_raw(key).await? else {
        return Ok(());
    };
    match ResourceData::decode(&kind, &raw) {
        Ok(data) => println!("  {}", data.summary()),
        Err(e) => println!("  {} (unreadable: {})", kind, e),
    }
    Ok(())
}
