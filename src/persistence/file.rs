use std::fs;
use std::path::{Path, PathBuf};

use sl_base::constants::BRANCHES_DIR;

use super::{ConversationSnapshot, ConversationStore, StoreError};

/// One YAML file per branch under `<store_dir>/branches/`.
#[derive(Debug, Clone)]
pub struct FileConversationStore {
    dir: PathBuf,
}

impl FileConversationStore {
    pub fn new(store_dir: &Path) -> Self {
        Self { dir: store_dir.join(BRANCHES_DIR) }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String =
            key.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
        self.dir.join(format!("{}.yaml", safe))
    }
}

impl ConversationStore for FileConversationStore {
    fn save(&self, snapshot: &ConversationSnapshot) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let yaml = serde_yaml::to_string(snapshot)?;
        // write-then-rename so a crash never leaves a half-written branch
        let path = self.path_for(&snapshot.key);
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, yaml)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<ConversationSnapshot, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let yaml = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&yaml)?)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "yaml") {
                let yaml = fs::read_to_string(&path)?;
                match serde_yaml::from_str::<ConversationSnapshot>(&yaml) {
                    Ok(snapshot) => keys.push(snapshot.key),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable branch file"),
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
