use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::config;
use crate::container::types::{ContainerConfig, ContainerState};
use crate::error::{ContainerError, ContainerResult, Context};
use crate::overlay::OverlayFs;

/// Durable per-container config and state, one pair of JSON files per
/// container name under `<root>/config/<name>/`.
pub struct ContainerStore {
    root: PathBuf,
}

impl ContainerStore {
    pub fn new(root: PathBuf) -> Self {
        ContainerStore { root }
    }

    fn dir(&self, name: &str) -> PathBuf {
        config::config_dir(&self.root).join(name)
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.dir(name).join("config.json")
    }

    fn state_path(&self, name: &str) -> PathBuf {
        self.dir(name).join("state.json")
    }

    pub fn exists(&self, name: &str) -> bool {
        self.config_path(name).exists() || self.state_path(name).exists()
    }

    pub fn list(&self) -> ContainerResult<Vec<(ContainerConfig, ContainerState)>> {
        let dir = config::config_dir(&self.root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).context("enumerate config directory")? {
            let entry = entry.context("read config directory entry")?;
            if !entry.file_type().context("stat config directory entry")?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.exists(&name) {
                out.push(self.load(&name)?);
            }
        }
        Ok(out)
    }

    pub fn load(&self, name: &str) -> ContainerResult<(ContainerConfig, ContainerState)> {
        if !self.exists(name) {
            return Err(ContainerError::NotFound { name: name.to_string() });
        }
        let config = read_json(&self.config_path(name))
            .context(format!("load config for {name}"))?;
        let state = read_json(&self.state_path(name))
            .context(format!("load state for {name}"))?;
        Ok((config, state))
    }

    pub fn save(&self, config: &ContainerConfig, state: &ContainerState) -> ContainerResult<()> {
        fs::create_dir_all(self.dir(&config.name)).context("create container config directory")?;
        write_json(&self.config_path(&config.name), config)
            .context(format!("save config for {}", config.name))?;
        write_json(&self.state_path(&state.name), state)
            .context(format!("save state for {}", state.name))?;
        Ok(())
    }

    pub fn save_state(&self, state: &ContainerState) -> ContainerResult<()> {
        write_json(&self.state_path(&state.name), state)
            .context(format!("save state for {}", state.name))
    }

    /// Unmounts the overlay and deletes the container's four directories.
    /// Errors from an already-gone mount or directory are tolerated.
    pub fn remove(&self, name: &str) -> ContainerResult<()> {
        let overlay = OverlayFs::new(self.root.clone());
        let _ = overlay.unmount(name);

        for dir in [
            config::mnt_dir(&self.root).join(name),
            config::work_dir(&self.root).join(name),
            config::cow_dir(&self.root).join(name),
            self.dir(name),
        ] {
            if dir.exists() {
                fs::remove_dir_all(&dir).context(format!("remove directory {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> ContainerResult<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ContainerError::persistence(format!("corrupt {}: {e}", path.display())))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> ContainerResult<()> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| ContainerError::persistence(format!("encode {}: {e}", path.display())))?;
    let mut f = File::create(&tmp)?;
    f.write_all(&json)?;
    f.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::types::Lifecycle;
    use tempfile::tempdir;

    fn sample() -> (ContainerConfig, ContainerState) {
        let config = ContainerConfig {
            name: "demo".to_string(),
            image_dir: "/images/demo".to_string(),
            child_entry_point: vec!["/bin/sh".to_string()],
            cgroups: Vec::new(),
        };
        let state = ContainerState::created("demo");
        (config, state)
    }

    #[test]
    fn config_and_state_serialize_as_camel_case_json() {
        let (config, mut state) = sample();
        state.parent_pid = 111;
        state.child_pid = 222;

        let config_value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            config_value,
            serde_json::json!({
                "name": "demo",
                "imageDir": "/images/demo",
                "childEntryPoint": ["/bin/sh"],
                "cgroups": [],
            })
        );

        let state_value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            state_value,
            serde_json::json!({
                "name": "demo",
                "unionMounted": false,
                "lifeCycle": "created",
                "parentPID": 111,
                "childPID": 222,
                "ipNet": null,
            })
        );
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = ContainerStore::new(dir.path().to_path_buf());
        let (config, state) = sample();

        assert!(!store.exists("demo"));
        store.save(&config, &state).unwrap();
        assert!(store.exists("demo"));

        let (loaded_config, loaded_state) = store.load("demo").unwrap();
        assert_eq!(loaded_config.name, "demo");
        assert_eq!(loaded_state.life_cycle, Lifecycle::Created);
    }

    #[test]
    fn load_missing_container_is_not_found() {
        let dir = tempdir().unwrap();
        let store = ContainerStore::new(dir.path().to_path_buf());
        let err = store.load("ghost").unwrap_err();
        assert!(matches!(err, ContainerError::NotFound { .. }));
    }

    #[test]
    fn list_enumerates_saved_containers() {
        let dir = tempdir().unwrap();
        let store = ContainerStore::new(dir.path().to_path_buf());
        let (config, state) = sample();
        store.save(&config, &state).unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0.name, "demo");
    }

    #[test]
    fn remove_deletes_config_directory() {
        let dir = tempdir().unwrap();
        let store = ContainerStore::new(dir.path().to_path_buf());
        let (config, state) = sample();
        store.save(&config, &state).unwrap();

        store.remove("demo").unwrap();
        assert!(!store.exists("demo"));
    }
}
