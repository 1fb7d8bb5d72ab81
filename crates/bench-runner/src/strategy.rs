use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompilationStrategy {
    Bool,
    Yao,
    OptLan,
    OptWan,
}

#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    pub compiled_dir: PathBuf,
    pub build_dir: PathBuf,
}

impl CompilationStrategy {
    pub const ALL: [CompilationStrategy; 4] = [
        CompilationStrategy::Bool,
        CompilationStrategy::Yao,
        CompilationStrategy::OptLan,
        CompilationStrategy::OptWan,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CompilationStrategy::Bool => "BOOL",
            CompilationStrategy::Yao => "YAO",
            CompilationStrategy::OptLan => "OPT_LAN",
            CompilationStrategy::OptWan => "OPT_WAN",
        }
    }

    pub fn log_dir_name(&self) -> String {
        self.name().to_lowercase()
    }

    pub fn needs_build(&self) -> bool {
        matches!(self, CompilationStrategy::OptLan | CompilationStrategy::OptWan)
    }

    pub fn artifact_path(&self, benchmark: &str, layout: &ArtifactLayout) -> PathBuf {
        match self {
            CompilationStrategy::Bool => layout.compiled_dir.join(format!("{}Bool.via", benchmark)),
            CompilationStrategy::Yao => layout.compiled_dir.join(format!("{}Yao.via", benchmark)),
            CompilationStrategy::OptLan => lan_artifact(&layout.build_dir, benchmark),
            CompilationStrategy::OptWan => {
                layout.build_dir.join("wan").join(format!("{}.via", benchmark))
            }
        }
    }
}

pub(crate) fn lan_artifact(build_dir: &Path, program: &str) -> PathBuf {
    build_dir.join("lan").join(format!("{}.via", program))
}

impl fmt::Display for CompilationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_paths_follow_strategy() {
        let layout = ArtifactLayout {
            compiled_dir: PathBuf::from("compiled"),
            build_dir: PathBuf::from("build/run-time"),
        };
        assert_eq!(
            CompilationStrategy::Bool.artifact_path("Median", &layout),
            PathBuf::from("compiled/MedianBool.via")
        );
        assert_eq!(
            CompilationStrategy::Yao.artifact_path("Median", &layout),
            PathBuf::from("compiled/MedianYao.via")
        );
        assert_eq!(
            CompilationStrategy::OptLan.artifact_path("Median", &layout),
            PathBuf::from("build/run-time/lan/Median.via")
        );
        assert_eq!(
            CompilationStrategy::OptWan.artifact_path("Median", &layout),
            PathBuf::from("build/run-time/wan/Median.via")
        );
    }

    #[test]
    fn only_optimised_variants_are_built() {
        let built: Vec<_> = CompilationStrategy::ALL
            .iter()
            .filter(|s| s.needs_build())
            .map(|s| s.log_dir_name())
            .collect();
        assert_eq!(built, vec!["opt_lan", "opt_wan"]);
    }
}
