use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Hierarchy files tried, in order, when none is configured.
pub const HIERARCHY_CANDIDATES: [&str; 3] = ["Subjects.xlsx.xlsx", "Subjects.xlsx", "Subjects.csv"];

pub const DEFAULT_ARTIFACT: &str = ".tagger/session.bin.gz";

/// Runtime settings. Every flag can also come from a `TAGGER_*` variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "question-tagger", version, about = "Tag questions with Subject → Topic → Subtopic")]
pub struct Config {
    /// Subject/Topic/Subtopic reference table (CSV or workbook)
    #[arg(long, env = "TAGGER_HIERARCHY")]
    pub hierarchy: Option<PathBuf>,

    /// Where the auto-saved session lives
    #[arg(long, env = "TAGGER_ARTIFACT", default_value = DEFAULT_ARTIFACT)]
    pub artifact: PathBuf,

    /// Seconds between auto-save checks
    #[arg(
        long,
        env = "TAGGER_AUTOSAVE_SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub autosave_secs: u64,

    /// Listen address for the web server
    #[arg(long, env = "TAGGER_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hierarchy: None,
            artifact: PathBuf::from(DEFAULT_ARTIFACT),
            autosave_secs: 10,
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

impl Config {
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_secs)
    }

    /// The configured hierarchy path, or the default candidates.
    pub fn hierarchy_candidates(&self) -> Vec<PathBuf> {
        match &self.hierarchy {
            Some(path) => vec![path.clone()],
            None => HIERARCHY_CANDIDATES.iter().map(PathBuf::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_parser_defaults() {
        let parsed = Config::try_parse_from(["question-tagger"]).unwrap();
        let default = Config::default();
        assert_eq!(parsed.artifact, default.artifact);
        assert_eq!(parsed.autosave_secs, default.autosave_secs);
        assert_eq!(parsed.bind, default.bind);
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Config::try_parse_from(["question-tagger", "--autosave-secs", "0"]).is_err());
    }

    #[test]
    fn explicit_hierarchy_replaces_candidates() {
        let cfg = Config::try_parse_from(["question-tagger", "--hierarchy", "ref/Tree.csv"]).unwrap();
        assert_eq!(cfg.hierarchy_candidates(), vec![PathBuf::from("ref/Tree.csv")]);
        assert_eq!(Config::default().hierarchy_candidates().len(), 3);
    }
}
