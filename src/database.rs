//! Signature database loading.
//!
//! Databases are JSON files found on a search path. A file that fails to
//! parse is skipped and reported; loading never fails as a whole, since an
//! empty database is a reportable condition rather than an error.

use crate::error::{RecoveryError, Result};
use crate::signature::Signature;
use crate::types::CardFormat;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable holding extra database paths (platform path list)
pub const DB_PATH_ENV: &str = "MEMCARD_RECOVERY_DB";
/// Directory searched last, relative to the working directory
pub const DEFAULT_DB_DIR: &str = "signatures";

#[derive(Debug, Deserialize)]
struct DatabaseFile {
    #[serde(default)]
    name: Option<String>,
    signatures: Vec<Signature>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSource {
    pub path: PathBuf,
    pub name: String,
    pub signatures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// What a load over the search path found
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub searched: Vec<PathBuf>,
    pub loaded: Vec<DatabaseSource>,
    pub skipped: Vec<SkippedFile>,
}

/// Signatures indexed by game id, in load order
#[derive(Debug, Clone, Default)]
pub struct SignatureDatabase {
    by_game: IndexMap<String, Vec<Arc<Signature>>>,
    count: usize,
}

impl SignatureDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every database reachable from `paths`.
    ///
    /// A path may name a JSON file or a directory, whose `*.json` files are
    /// loaded in file-name order. Missing paths are ignored.
    pub fn load(paths: &[PathBuf]) -> (Self, LoadReport) {
        let mut db = Self::new();
        let mut report = LoadReport::default();

        for path in paths {
            report.searched.push(path.clone());
            for file in database_files(path) {
                match db.load_file(&file) {
                    Ok(source) => {
                        log::info!(
                            "loaded {} signatures from {}",
                            source.signatures,
                            file.display()
                        );
                        report.loaded.push(source);
                    }
                    Err(err) => {
                        log::warn!("skipping signature database {}: {}", file.display(), err);
                        report.skipped.push(SkippedFile {
                            path: file,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }
        (db, report)
    }

    /// Add all signatures of one file; nothing is added if any is invalid
    pub fn load_file(&mut self, path: &Path) -> Result<DatabaseSource> {
        let text = fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.add_json(path, &name, &text)
    }

    pub fn from_json_str(name: &str, text: &str) -> Result<Self> {
        let mut db = Self::new();
        db.add_json(Path::new(name), name, text)?;
        Ok(db)
    }

    fn add_json(&mut self, path: &Path, default_name: &str, text: &str) -> Result<DatabaseSource> {
        let database_error = |reason: String| RecoveryError::Database {
            path: path.to_path_buf(),
            reason,
        };

        let file: DatabaseFile =
            serde_json::from_str(text).map_err(|e| database_error(e.to_string()))?;
        for signature in &file.signatures {
            signature.validate().map_err(database_error)?;
        }

        let signatures = file.signatures.len();
        for signature in file.signatures {
            self.insert(signature);
        }
        Ok(DatabaseSource {
            path: path.to_path_buf(),
            name: file.name.unwrap_or_else(|| default_name.to_string()),
            signatures,
        })
    }

    pub fn add(&mut self, signature: Signature) -> Result<()> {
        signature
            .validate()
            .map_err(RecoveryError::InvalidArgument)?;
        self.insert(signature);
        Ok(())
    }

    fn insert(&mut self, signature: Signature) {
        self.by_game
            .entry(signature.game_id.clone())
            .or_default()
            .push(Arc::new(signature));
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn for_game(&self, game_id: &str) -> &[Arc<Signature>] {
        self.by_game.get(game_id).map_or(&[], |v| v.as_slice())
    }

    /// Signatures for `format` in database order: game ids in first-load
    /// order, then load order within a game id
    pub fn for_format(&self, format: CardFormat) -> Vec<Arc<Signature>> {
        self.by_game
            .values()
            .flatten()
            .filter(|s| s.format == format)
            .cloned()
            .collect()
    }

    pub fn game_ids(&self) -> impl Iterator<Item = &str> {
        self.by_game.keys().map(String::as_str)
    }
}

fn database_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => {
            log::debug!("signature path {} not found", path.display());
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    files.sort();
    files
}

/// Explicit paths, then the environment path list, then `./signatures`
pub fn search_paths(explicit: &[PathBuf], use_env: bool) -> Vec<PathBuf> {
    let mut paths = explicit.to_vec();
    if use_env {
        if let Some(value) = std::env::var_os(DB_PATH_ENV) {
            paths.extend(std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()));
        }
    }
    paths.push(PathBuf::from(DEFAULT_DB_DIR));
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{test_signature, vmu_test_signature, TEST_GAME};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_db(dir: &Path, name: &str, signatures: Vec<Signature>) -> PathBuf {
        let path = dir.join(name);
        let json = serde_json::json!({ "name": name, "signatures": signatures });
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(json.to_string().as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_directory_in_name_order() {
        let dir = TempDir::new().unwrap();
        write_db(dir.path(), "b_vmu.json", vec![vmu_test_signature()]);
        write_db(dir.path(), "a_gcn.json", vec![test_signature()]);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let (db, report) = SignatureDatabase::load(&[dir.path().to_path_buf()]);
        assert_eq!(db.len(), 2);
        assert_eq!(report.loaded.len(), 2);
        assert_eq!(report.loaded[0].name, "a_gcn.json");
        assert!(report.skipped.is_empty());
        assert_eq!(db.game_ids().next(), Some(TEST_GAME));
        assert_eq!(db.for_format(CardFormat::Gcn).len(), 1);
        assert_eq!(db.for_format(CardFormat::Vmu).len(), 1);
        assert_eq!(db.for_game(TEST_GAME)[0].title, "Test Game");
        assert!(db.for_game("GXXE01").is_empty());
    }

    #[test]
    fn test_bad_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        write_db(dir.path(), "good.json", vec![test_signature()]);
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let mut invalid = test_signature();
        invalid.patterns.clear();
        write_db(dir.path(), "invalid.json", vec![test_signature(), invalid]);

        let (db, report) = SignatureDatabase::load(&[dir.path().to_path_buf()]);
        assert_eq!(db.len(), 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped.iter().any(|s| s.path.ends_with("broken.json")));
    }

    #[test]
    fn test_overflowing_offsets_are_rejected() {
        let mut value = serde_json::to_value(test_signature()).unwrap();
        value["patterns"] = serde_json::json!([{ "offset": u64::MAX, "ascii": "AB" }]);
        let text = serde_json::json!({ "signatures": [value] }).to_string();
        assert!(matches!(
            SignatureDatabase::from_json_str("overflow", &text),
            Err(RecoveryError::Database { .. })
        ));

        let dir = TempDir::new().unwrap();
        write_db(dir.path(), "good.json", vec![test_signature()]);
        fs::write(dir.path().join("overflow.json"), &text).unwrap();
        let (db, report) = SignatureDatabase::load(&[dir.path().to_path_buf()]);
        assert_eq!(db.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("overflow.json"));
    }

    #[test]
    fn test_missing_paths_give_empty_database() {
        let (db, report) = SignatureDatabase::load(&[PathBuf::from("/nonexistent/memcard-db")]);
        assert!(db.is_empty());
        assert!(report.loaded.is_empty());
        assert_eq!(report.searched.len(), 1);
    }

    #[test]
    fn test_signature_order_within_game() {
        let mut second = test_signature();
        second.title = "Second".to_string();
        let json = serde_json::json!({ "signatures": [test_signature(), second] }).to_string();
        let db = SignatureDatabase::from_json_str("inline", &json).unwrap();
        let titles: Vec<_> = db.for_game(TEST_GAME).iter().map(|s| s.title.clone()).collect();
        assert_eq!(titles, vec!["Test Game", "Second"]);
    }

    #[test]
    fn test_search_path_order() {
        let explicit = vec![PathBuf::from("/tmp/one.json")];
        let paths = search_paths(&explicit, false);
        assert_eq!(paths, vec![PathBuf::from("/tmp/one.json"), PathBuf::from("signatures")]);
    }
}
