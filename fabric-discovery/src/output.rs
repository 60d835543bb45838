//! State file publishing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::discovery::Inventory;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `<path>.tmp` and rename it over `path`, so readers never see a partial file.
pub async fn write_atomic(path: &Path, inventory: &Inventory) -> Result<()> {
    let json = serde_json::to_vec_pretty(inventory).context("serializing inventory")?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &json)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Interface, Workload};

    #[test]
    fn temp_file_sits_next_to_target() {
        assert_eq!(
            temp_path(Path::new("/var/run/proxmox_state.json")),
            PathBuf::from("/var/run/proxmox_state.json.tmp")
        );
    }

    #[tokio::test]
    async fn replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "stale").unwrap();

        let mut inventory = Inventory::new();
        inventory.insert(
            "web".into(),
            Workload {
                vmid: 101,
                name: "web".into(),
                host_name: "pve1".into(),
                status: "running".into(),
                interfaces: vec![Interface {
                    mac_address: "BC24.1100.0001".into(),
                    external_vlan: 100,
                    ip_addresses: vec!["10.1.0.5".into()],
                }],
            },
        );
        write_atomic(&path, &inventory).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["web"]["vmid"], 101);
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("state.json");
        assert!(write_atomic(&path, &Inventory::new()).await.is_err());
    }
}
