//! Declarative YAML matrix of scenario runs

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{Adapter, LaunchMode, ScenarioOptions};
use crate::error::{E2eError, E2eResult};
use crate::scenario::Scenario;

/// One launch of the app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRun {
    pub mode: LaunchMode,

    #[serde(default)]
    pub options: ScenarioOptions,

    /// Overrides the adapter taken from the environment
    #[serde(default)]
    pub adapter: Option<Adapter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioMatrix {
    pub runs: Vec<MatrixRun>,
}

impl ScenarioMatrix {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let matrix: Self = serde_yaml::from_str(yaml)?;
        if matrix.runs.is_empty() {
            return Err(E2eError::MatrixParse("matrix has no runs".to_string()));
        }
        Ok(matrix)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::MatrixParse(format!("{}: {}", path.display(), e)))
    }

    /// Load one file, or every `.yaml`/`.yml` file below a directory in
    /// path order
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.is_file() {
            return Self::from_file(path);
        }

        let mut files: Vec<_> = walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        files.sort();

        let mut runs = Vec::new();
        for file in files {
            runs.extend(Self::from_file(&file)?.runs);
        }

        if runs.is_empty() {
            return Err(E2eError::MatrixParse(format!(
                "no scenario runs found in {}",
                path.display()
            )));
        }
        Ok(Self { runs })
    }

    /// Resolve every run to a scenario, filling in `default_adapter`
    pub fn scenarios(&self, default_adapter: Adapter) -> Vec<Scenario> {
        self.runs
            .iter()
            .map(|run| {
                Scenario::new(
                    run.mode,
                    run.options,
                    run.adapter.unwrap_or(default_adapter),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matrix() {
        let yaml = r#"
runs:
  - mode: dev
  - mode: dev
    options:
      skip_server_hmr: true
  - mode: prod
    adapter: h3
    options:
      https: true
      is_flaky: true
"#;
        let matrix = ScenarioMatrix::from_yaml(yaml).unwrap();
        assert_eq!(matrix.runs.len(), 3);

        let scenarios = matrix.scenarios(Adapter::Express);
        assert_eq!(scenarios[0].adapter, Adapter::Express);
        assert!(scenarios[1].options.skip_server_hmr);
        assert_eq!(scenarios[2].mode, LaunchMode::Prod);
        assert_eq!(scenarios[2].adapter, Adapter::H3);
        assert!(scenarios[2].options.https && scenarios[2].options.is_flaky);
    }

    #[test]
    fn test_empty_matrix_is_rejected() {
        assert!(matches!(
            ScenarioMatrix::from_yaml("runs: []"),
            Err(E2eError::MatrixParse(_))
        ));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(ScenarioMatrix::from_yaml("runs:\n  - mode: staging\n").is_err());
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a-dev.yaml"), "runs:\n  - mode: dev\n").unwrap();
        std::fs::write(dir.path().join("b-prod.yml"), "runs:\n  - mode: prod\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let matrix = ScenarioMatrix::load(dir.path()).unwrap();
        let modes: Vec<_> = matrix.runs.iter().map(|r| r.mode).collect();
        assert_eq!(modes, vec![LaunchMode::Dev, LaunchMode::Prod]);
    }

    #[test]
    fn test_load_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ScenarioMatrix::load(dir.path()).is_err());
    }
}
