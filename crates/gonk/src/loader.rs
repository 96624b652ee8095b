//! Module Loader
//!
//! Finds module scripts on disk. Every `*.js` file directly inside the
//! modules directory is one module, named after its file stem.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::module::LoadError;

/// A module script read from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    pub name: String,
    pub path: PathBuf,
    pub script: String,
}

/// Module name for a script path, `None` unless it is a `.js` file
pub fn module_name(path: &Path) -> Option<String> {
    if path.extension()? != "js" {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

/// Read one module script
pub async fn read_module(path: &Path) -> Result<ModuleSource, LoadError> {
    let name = module_name(path).ok_or_else(|| LoadError::Read {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a .js file"),
    })?;

    let script = fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(ModuleSource {
        name,
        path: path.to_path_buf(),
        script,
    })
}

/// Read every module in `dir`, sorted by name.
///
/// A missing directory has no modules. Unreadable files are skipped.
pub async fn discover_modules(dir: &Path) -> Result<Vec<ModuleSource>, LoadError> {
    if !dir.exists() {
        debug!("No modules directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let read_err = |source| LoadError::Read {
        path: dir.to_path_buf(),
        source,
    };

    let mut modules = Vec::new();
    let mut entries = fs::read_dir(dir).await.map_err(read_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let path = entry.path();
        if module_name(&path).is_none() || !path.is_file() {
            continue;
        }

        match read_module(&path).await {
            Ok(source) => modules.push(source),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    modules.sort_by(|a, b| a.name.cmp(&b.name));
    info!("Found {} modules in {}", modules.len(), dir.display());
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_discover_only_js_sorted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path();

        fs::write(path.join("weather.js"), "module.exports = function () {};")
            .await
            .unwrap();
        fs::write(path.join("meme-gen.js"), "// memes").await.unwrap();
        fs::write(path.join("notes.txt"), "not a module").await.unwrap();
        fs::create_dir(path.join("nested.js")).await.unwrap();

        let modules = discover_modules(path).await.unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["meme-gen", "weather"]);
        assert_eq!(modules[0].script, "// memes");
        assert_eq!(modules[0].path, path.join("meme-gen.js"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let modules = discover_modules(&dir.path().join("absent")).await.unwrap();
        assert!(modules.is_empty());
    }

    #[tokio::test]
    async fn test_read_module_errors() {
        let dir = TempDir::new().unwrap();

        let err = read_module(&dir.path().join("gone.js")).await.unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }));

        let err = read_module(&dir.path().join("gone.txt")).await.unwrap_err();
        assert!(err.to_string().contains("not a .js file"));
    }

    #[test]
    fn test_module_name() {
        assert_eq!(module_name(Path::new("/m/meme-gen.js")), Some("meme-gen".to_string()));
        assert_eq!(module_name(Path::new("/m/readme.md")), None);
        assert_eq!(module_name(Path::new("/m/noext")), None);
    }
}
