use anyhow::Result;

use crate::store::SnapshotStore;

pub async fn run(store: &SnapshotStore) -> Result<()> {
    let transfers = store.list_transfers().await?;
    if transfers.is_empty() {
        println!("No stored transfers.");
        return Ok(());
    }
    println!("{:<6} {:<10} {:<12} {}", "ID", "KIND", "STATE", "REMOTE");
    for t in transfers {
        println!(
            "{:<6} {:<10} {:<12} {}",
            t.id,
            format!("{:?}", t.kind).to_lowercase(),
            format!("{:?}", t.state).to_lowercase(),
            t.remote
        );
    }
    Ok(())
}
