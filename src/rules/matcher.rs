use super::{default_rule, ResolvedRule};
use crate::config::RuleConfig;
use crate::ConfigError;
use regex::Regex;
use std::sync::Arc;

struct CompiledRule {
    regex: Regex,
    resolved: Arc<ResolvedRule>,
}

/// Matches URLs against the configured rules
///
/// Every rule is merged over the default and compiled once; resolving a URL
/// only runs the rule patterns.
pub struct RuleMatcher {
    rules: Vec<CompiledRule>,
    default: Arc<ResolvedRule>,
}

impl RuleMatcher {
    /// Compiles `rules` in file order
    ///
    /// # Returns
    ///
    /// * `Ok(RuleMatcher)` - All patterns and selectors compiled
    /// * `Err(ConfigError)` - A pattern or selector is invalid
    pub fn new(rules: &[RuleConfig]) -> Result<Self, ConfigError> {
        let default_config = default_rule();
        let default = Arc::new(ResolvedRule::from_default(&default_config)?);

        let rules = rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    ConfigError::InvalidPattern(format!("'{}': {}", rule.pattern, e))
                })?;
                Ok(CompiledRule {
                    regex,
                    resolved: Arc::new(ResolvedRule::merge(rule, &default_config)?),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { rules, default })
    }

    /// All rules whose pattern matches `url`, in file order
    pub fn find_rules(&self, url: &str) -> Vec<Arc<ResolvedRule>> {
        self.matching(url).map(|r| r.resolved.clone()).collect()
    }

    /// The matching rule with the longest pattern, first in file order on ties
    pub fn most_specific(&self, url: &str) -> Option<Arc<ResolvedRule>> {
        let mut best: Option<&CompiledRule> = None;
        for rule in self.matching(url) {
            let longer = best.map_or(true, |b| {
                rule.regex.as_str().len() > b.regex.as_str().len()
            });
            if longer {
                best = Some(rule);
            }
        }
        best.map(|r| r.resolved.clone())
    }

    /// The rule to apply to `url`: the most specific match, or the default
    pub fn resolve(&self, url: &str) -> Arc<ResolvedRule> {
        self.most_specific(url)
            .unwrap_or_else(|| self.default.clone())
    }

    /// Every compiled rule, default first
    pub fn all(&self) -> impl Iterator<Item = &ResolvedRule> {
        std::iter::once(self.default.as_ref()).chain(self.rules.iter().map(|r| r.resolved.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn matching<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a CompiledRule> + 'a {
        self.rules.iter().filter(move |r| r.regex.is_match(url))
    }
}

impl std::fmt::Debug for RuleMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleMatcher")
            .field(
                "patterns",
                &self.rules.iter().map(|r| r.regex.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
