//! Loading of the lookup tables used by the brake controller and the custom
//! steering processor.
//!
//! Tables are JSON documents by default. Files with a `.toml` extension are
//! parsed as TOML with the same field names, which is handy when the table
//! lives next to other hand-edited configuration.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read content from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to unmarshal json content from {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unable to unmarshal toml content from {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Read `path` and deserialize it, picking the format from the file extension.
pub async fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    debug!("Loaded {} bytes from {}", content.len(), path.display());

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fail unless every value is strictly greater than the one before.
pub(crate) fn ensure_strictly_increasing(name: &str, values: &[f32]) -> Result<(), ConfigError> {
    match values.windows(2).find(|pair| pair[1] <= pair[0]) {
        Some(pair) => Err(ConfigError::Validation(format!(
            "{} must be strictly increasing, found {} followed by {}",
            name, pair[0], pair[1]
        ))),
        None => Ok(()),
    }
}

/// Fail unless every value is strictly lower than the one before.
pub(crate) fn ensure_strictly_decreasing(name: &str, values: &[f32]) -> Result<(), ConfigError> {
    match values.windows(2).find(|pair| pair[1] >= pair[0]) {
        Some(pair) => Err(ConfigError::Validation(format!(
            "{} must be strictly decreasing, found {} followed by {}",
            name, pair[0], pair[1]
        ))),
        None => Ok(()),
    }
}

/// Fail when the two parallel arrays are empty or of different lengths.
pub(crate) fn ensure_parallel(
    left_name: &str,
    left: &[f32],
    right_name: &str,
    right: &[f32],
) -> Result<(), ConfigError> {
    if left.is_empty() || right.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{} and {} must not be empty",
            left_name, right_name
        )));
    }
    if left.len() != right.len() {
        return Err(ConfigError::Validation(format!(
            "{} ({} values) and {} ({} values) must have the same length",
            left_name,
            left.len(),
            right_name,
            right.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Table {
        values: Vec<f32>,
    }

    #[tokio::test]
    async fn load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"values": [0.1, 0.2]}}"#).unwrap();

        let table: Table = load_file(file.path()).await.unwrap();
        assert_eq!(table.values, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "values = [0.1, 0.2]").unwrap();

        let table: Table = load_file(file.path()).await.unwrap();
        assert_eq!(table.values, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let result: Result<Table, _> = load_file(Path::new("/nonexistent/table.json")).await;
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn malformed_json_is_reported() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{not json").unwrap();

        let result: Result<Table, _> = load_file(file.path()).await;
        assert!(matches!(result, Err(ConfigError::Json { .. })));
    }

    #[test]
    fn ordering_checks() {
        assert!(ensure_strictly_increasing("v", &[0.1, 0.2, 0.3]).is_ok());
        assert!(ensure_strictly_increasing("v", &[0.1, 0.1]).is_err());
        assert!(ensure_strictly_decreasing("v", &[0.9, 0.5, 0.1]).is_ok());
        assert!(ensure_strictly_decreasing("v", &[0.9, 0.95]).is_err());
        assert!(ensure_parallel("a", &[0.1], "b", &[]).is_err());
        assert!(ensure_parallel("a", &[0.1], "b", &[0.2, 0.3]).is_err());
    }
}
