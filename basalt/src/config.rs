use anyhow::Context;
use serde::Deserialize;

use crate::error::OptResult;
use crate::rules::{OptFlags, RuleId};

const DEFAULT_JOIN_CONCURRENCY: usize = 5;

/// Knobs consulted by a single optimization run.
///
/// A value of this struct is passed explicitly into [`crate::optimizer::optimize`], there is
/// no process wide optimizer state.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// When false, inner/outer joins without any equality condition are rejected.
    pub allow_cartesian_product: bool,
    /// Parallelism hint for hash join probing, used by the cost model.
    pub join_concurrency: usize,
    /// Names of the logical rules allowed to run, in any order. Intersected with the flags
    /// passed to [`crate::optimizer::optimize`].
    pub rules: Vec<String>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            allow_cartesian_product: true,
            join_concurrency: DEFAULT_JOIN_CONCURRENCY,
            rules: OptFlags::all()
                .iter()
                .map(|rule| rule.as_ref().to_string())
                .collect(),
        }
    }
}

impl OptimizerConfig {
    pub fn from_yaml(content: &str) -> OptResult<Self> {
        serde_yaml::from_str(content).context("Failed to parse optimizer config from yaml")
    }

    pub fn from_json(content: &str) -> OptResult<Self> {
        serde_json::from_str(content).context("Failed to parse optimizer config from json")
    }

    /// Rule flags named by `rules`.
    pub fn flags(&self) -> OptResult<OptFlags> {
        self.rules
            .iter()
            .map(|name| {
                name.parse::<RuleId>()
                    .with_context(|| format!("Unknown optimizer rule: {name}"))
            })
            .collect()
    }

    pub fn join_concurrency(&self) -> usize {
        self.join_concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OptimizerConfig::default();
        assert!(config.allow_cartesian_product);
        assert_eq!(5, config.join_concurrency);
        assert_eq!(OptFlags::all(), config.flags().unwrap());
    }

    #[test]
    fn test_load_yaml() {
        let config = OptimizerConfig::from_yaml(
            r#"
allow_cartesian_product: false
rules:
  - Decorrelate
  - ColumnPruning
"#,
        )
        .unwrap();

        assert!(!config.allow_cartesian_product);
        assert_eq!(5, config.join_concurrency);
        assert_eq!(
            RuleId::Decorrelate | RuleId::ColumnPruning,
            config.flags().unwrap()
        );
    }

    #[test]
    fn test_load_json_with_unknown_rule() {
        let config =
            OptimizerConfig::from_json(r#"{"join_concurrency": 0, "rules": ["Magic"]}"#).unwrap();
        assert_eq!(1, config.join_concurrency());
        assert!(config.flags().is_err());
    }
}
