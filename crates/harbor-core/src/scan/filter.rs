//! Inclusion/exclusion rules deciding which artifacts a scan visits.

use super::{ArtifactDescriptor, ScanKind, ScanScope};
use serde::{Deserialize, Serialize};

/// Glob rules for one family of scans.
///
/// With `default_include` an artifact is visited unless it matches `skip`
/// without also matching `include`. Without it, an artifact is visited only when
/// it matches `include` and not `skip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRules {
    #[serde(default)]
    pub skip: Vec<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default = "default_true")]
    pub default_include: bool,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            skip: Vec::new(),
            include: Vec::new(),
            default_include: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Filter configuration as handed over by the deployer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilterConfig {
    /// Rules for tag-library scans.
    #[serde(default)]
    pub tld: FilterRules,
    /// Rules for fragment, plugin and layer scans.
    #[serde(default)]
    pub pluggability: FilterRules,
    /// Whether shared library artifacts take part in scans at all.
    #[serde(default = "default_true")]
    pub scan_shared: bool,
}

impl Default for ScanFilterConfig {
    fn default() -> Self {
        Self {
            tld: FilterRules::default(),
            pluggability: FilterRules::default(),
            scan_shared: true,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRules {
    skip: Vec<glob::Pattern>,
    include: Vec<glob::Pattern>,
    default_include: bool,
}

impl CompiledRules {
    fn compile(rules: &FilterRules) -> Result<Self, glob::PatternError> {
        let compile_all = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| glob::Pattern::new(p))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            skip: compile_all(&rules.skip)?,
            include: compile_all(&rules.include)?,
            default_include: rules.default_include,
        })
    }

    fn accepts(&self, file_name: &str) -> bool {
        let skipped = self.skip.iter().any(|p| p.matches(file_name));
        let included = self.include.iter().any(|p| p.matches(file_name));
        if self.default_include {
            !skipped || included
        } else {
            included && !skipped
        }
    }
}

/// Compiled [`ScanFilterConfig`].
#[derive(Debug, Clone)]
pub struct ScanFilter {
    tld: CompiledRules,
    pluggability: CompiledRules,
    scan_shared: bool,
}

impl ScanFilter {
    pub fn new(config: &ScanFilterConfig) -> Result<Self, glob::PatternError> {
        Ok(Self {
            tld: CompiledRules::compile(&config.tld)?,
            pluggability: CompiledRules::compile(&config.pluggability)?,
            scan_shared: config.scan_shared,
        })
    }

    /// Filter that visits everything.
    pub fn accept_all() -> Self {
        let everything = CompiledRules {
            skip: Vec::new(),
            include: Vec::new(),
            default_include: true,
        };
        Self {
            tld: everything.clone(),
            pluggability: everything,
            scan_shared: true,
        }
    }

    pub fn check(&self, kind: ScanKind, artifact: &ArtifactDescriptor) -> bool {
        if artifact.scope() == ScanScope::SharedLibrary && !self.scan_shared {
            return false;
        }
        let rules = match kind {
            ScanKind::Tld => &self.tld,
            ScanKind::Fragment | ScanKind::Plugin | ScanKind::Layer => &self.pluggability,
        };
        rules.accepts(&artifact.file_name())
    }
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self::accept_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn rules(skip: &[&str], include: &[&str], default_include: bool) -> FilterRules {
        FilterRules {
            skip: skip.iter().map(|s| s.to_string()).collect(),
            include: include.iter().map(|s| s.to_string()).collect(),
            default_include,
        }
    }

    #[rstest]
    #[case::default_plain(true, "app-core", true)]
    #[case::default_skipped(true, "junit-4", false)]
    #[case::default_skip_overridden(true, "junit-harbor", true)]
    #[case::strict_plain(false, "app-core", false)]
    #[case::strict_included(false, "web-ui", true)]
    #[case::strict_included_but_skipped(false, "web-junit", false)]
    fn rule_truth_table(#[case] default_include: bool, #[case] name: &str, #[case] expected: bool) {
        let compiled = CompiledRules::compile(&rules(
            &["junit*", "*junit*"],
            &["*harbor*", "web-*"],
            default_include,
        ))
        .unwrap();
        assert_eq!(compiled.accepts(name), expected);
    }

    #[test]
    fn tld_and_pluggability_rules_are_independent() {
        let filter = ScanFilter::new(&ScanFilterConfig {
            tld: rules(&["*"], &[], true),
            ..ScanFilterConfig::default()
        })
        .unwrap();
        let artifact = ArtifactDescriptor::new("/u/lib/taglib", ScanScope::UnitLocal);
        assert!(!filter.check(ScanKind::Tld, &artifact));
        assert!(filter.check(ScanKind::Plugin, &artifact));
    }

    #[test]
    fn shared_artifacts_can_be_excluded() {
        let filter = ScanFilter::new(&ScanFilterConfig {
            scan_shared: false,
            ..ScanFilterConfig::default()
        })
        .unwrap();
        let shared = ArtifactDescriptor::new("/platform/lib/json", ScanScope::SharedLibrary);
        assert!(!filter.check(ScanKind::Fragment, &shared));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let config = ScanFilterConfig {
            tld: rules(&["[unclosed"], &[], true),
            ..ScanFilterConfig::default()
        };
        assert!(ScanFilter::new(&config).is_err());
    }
}
