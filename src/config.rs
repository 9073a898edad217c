use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::classifier::ClassifierOptions;
use crate::cli::Cli;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("could not determine a data directory; set storage.data_dir")]
    NoDataDir,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Origins allowed to call the API from a browser. Empty means same-origin only.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:8080".to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub classifier: ClassifierOptions,
    pub storage: StorageConfig,
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "asclepius")
}

/// `~/.config/asclepius/config.toml` or the platform equivalent.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Reads the file named on the command line, else the default location
    /// if it exists, else defaults. Command line flags win over the file.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let path = cli
            .config
            .clone()
            .or_else(|| default_config_path().filter(|p| p.exists()));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        config.apply_cli(cli);
        config.finish()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(bind) = &cli.bind {
            self.server.bind = bind.clone();
        }
        if let Some(model) = &cli.model {
            self.classifier.model_path = model.clone();
        }
        if let Some(labels) = &cli.labels {
            self.classifier.labels_path = Some(labels.clone());
        }
        if let Some(data_dir) = &cli.data_dir {
            self.storage.data_dir = Some(data_dir.clone());
        }
    }

    /// Validates values and reads the labels file, if any.
    pub fn finish(&mut self) -> Result<(), ConfigError> {
        if self.server.allowed_origins.iter().any(|o| o.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "server.allowed_origins must not contain blank entries".into(),
            ));
        }

        let options = &mut self.classifier;
        if options.max_results == 0 {
            return Err(ConfigError::Invalid("classifier.max_results must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&options.score_threshold) {
            return Err(ConfigError::Invalid(
                "classifier.score_threshold must be within [0, 1]".into(),
            ));
        }
        if options.input_size == 0 {
            return Err(ConfigError::Invalid("classifier.input_size must be positive".into()));
        }

        if let Some(path) = &options.labels_path {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            options.labels = parse_labels(&raw);
        }
        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => project_dirs()
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or(ConfigError::NoDataDir),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("history.db"))
    }

    pub fn images_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("images"))
    }
}

fn parse_labels(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{InputType, Layout, ScoreActivation};
    use clap::Parser;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert!(config.server.allowed_origins.is_empty());
        assert_eq!(config.classifier.score_threshold, 0.1);
        assert_eq!(config.classifier.max_results, 3);
        assert_eq!(config.classifier.num_threads, 4);
        assert_eq!(config.classifier.input_size, 224);
        assert_eq!(config.classifier.input_type, InputType::U8);
        assert_eq!(config.classifier.layout, Layout::Nhwc);
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn reads_sections() {
        let config = Config::from_toml_str(
            r#"
            [server]
            bind = "0.0.0.0:9000"
            allowed_origins = ["http://localhost:3000"]

            [classifier]
            score_threshold = 0.3
            max_results = 1
            model_path = "models/skin.onnx"
            input_type = "f32"
            layout = "nchw"
            score_activation = "softmax"
            labels = ["Non Cancer", "Cancer"]

            [storage]
            data_dir = "/var/lib/asclepius"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.classifier.max_results, 1);
        assert_eq!(config.classifier.model_path, PathBuf::from("models/skin.onnx"));
        assert_eq!(config.classifier.input_type, InputType::F32);
        assert_eq!(config.classifier.layout, Layout::Nchw);
        assert_eq!(config.classifier.score_activation, ScoreActivation::Softmax);
        assert_eq!(config.classifier.label_for(1), "Cancer");
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/var/lib/asclepius/history.db")
        );
        assert_eq!(
            config.images_dir().unwrap(),
            PathBuf::from("/var/lib/asclepius/images")
        );
    }

    #[test]
    fn cli_flags_override_file_and_labels_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let labels_path = dir.path().join("labels.txt");
        fs::write(&config_path, "[server]\nbind = \"127.0.0.1:1\"\n").unwrap();
        fs::write(&labels_path, "Benign\n\n  Malignant  \n").unwrap();

        let cli = Cli::parse_from([
            "asclepius",
            "--config",
            config_path.to_str().unwrap(),
            "--bind",
            "127.0.0.1:2",
            "--labels",
            labels_path.to_str().unwrap(),
            "--data-dir",
            dir.path().to_str().unwrap(),
        ]);
        let config = Config::load(&cli).unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:2");
        assert_eq!(config.classifier.labels, vec!["Benign", "Malignant"]);
        assert_eq!(config.data_dir().unwrap(), dir.path());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = Config::from_toml_str("[classifier]\nmax_results = 0\n").unwrap();
        assert!(matches!(config.finish(), Err(ConfigError::Invalid(_))));

        let mut config = Config::from_toml_str("[classifier]\nscore_threshold = 1.5\n").unwrap();
        assert!(matches!(config.finish(), Err(ConfigError::Invalid(_))));

        let mut config = Config::from_toml_str("[server]\nallowed_origins = [\" \"]\n").unwrap();
        assert!(matches!(config.finish(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_enum_values_fail_to_parse() {
        assert!(matches!(
            Config::from_toml_str("[classifier]\nlayout = \"hwc\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
