use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "bench.yaml";

pub const DEFAULT_BENCHMARKS: [&str; 6] = [
    "Biomatch",
    "HhiScore",
    "HistoricalMillionaires",
    "Kmeans",
    "Median",
    "TwoRoundBidding",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub build_dir: PathBuf,
    pub inputs_dir: PathBuf,
    pub compiled_dir: PathBuf,
    pub make: String,
    /// Compiler/runtime command line. Asked from the build tool when unset.
    pub viaduct: Option<String>,
    pub verbose_runtime: bool,
    pub network: String,
    pub benchmarks: Vec<String>,
    /// Host to input file name, resolved under `inputs_dir`, used when a
    /// benchmark has no input files of its own.
    pub default_hosts: BTreeMap<String, PathBuf>,
    pub strict: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("build"),
            inputs_dir: PathBuf::from("inputs"),
            compiled_dir: PathBuf::from("compiled"),
            make: "make".to_string(),
            viaduct: None,
            verbose_runtime: true,
            network: "NETWORK".to_string(),
            benchmarks: DEFAULT_BENCHMARKS.iter().map(|b| b.to_string()).collect(),
            default_hosts: BTreeMap::from([
                ("alice".to_string(), PathBuf::from("alice.txt")),
                ("bob".to_string(), PathBuf::from("bob.txt")),
            ]),
            strict: false,
        }
    }
}

impl BenchConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.make.trim().is_empty() {
            return Err(anyhow!("config: make must not be empty"));
        }
        if let Some(viaduct) = &self.viaduct {
            if viaduct.trim().is_empty() {
                return Err(anyhow!("config: viaduct must not be empty when set"));
            }
        }
        if let Some(bad) = self.benchmarks.iter().find(|b| b.trim().is_empty()) {
            return Err(anyhow!("config: invalid benchmark name {:?}", bad));
        }
        Ok(())
    }

    pub fn campaign_dir(&self, campaign: &str) -> PathBuf {
        self.build_dir.join(campaign)
    }
}
