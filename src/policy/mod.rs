//! Naming policy for path creation.
//!
//! Two rule files, `deny.rules` and `allow.rules`, each hold one regular
//! expression per line. A path that matches any deny rule is refused; if
//! the allow list is non-empty, a path must also match one of its rules.
//! Both rule sets are compiled once at startup and never change while the
//! filesystem is mounted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;

/// File name of the allow list inside the configuration directory.
pub const ALLOW_RULES_FILE: &str = "allow.rules";
/// File name of the deny list inside the configuration directory.
pub const DENY_RULES_FILE: &str = "deny.rules";

/// Outcome of evaluating a virtual path against the configured rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid pattern in {file} line {line}: {source}")]
    Pattern {
        file: PathBuf,
        line: usize,
        source: regex::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Ordered set of compiled path patterns, matched with any-match
/// semantics. Order only decides which rule a denial reports.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Regex>,
}

impl RuleSet {
    /// Compile a rule set from raw pattern strings.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for pattern in patterns {
            rules.push(Regex::new(pattern.as_ref())?);
        }
        Ok(Self { rules })
    }

    /// Read one pattern per line from `path`. A missing file leaves the
    /// set empty; a pattern that fails to compile is fatal.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let mut rules = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            let rule = Regex::new(line).map_err(|source| PolicyError::Pattern {
                file: path.to_path_buf(),
                line: idx + 1,
                source,
            })?;
            info!("rule from {}: {}", path.display(), line);
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// First rule matching `path`, if any.
    fn first_match(&self, path: &str) -> Option<&Regex> {
        self.rules.iter().find(|rule| rule.is_match(path))
    }
}

/// Immutable deny/allow rule pair. Built once at startup and shared
/// read-only for the lifetime of the mount.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    deny: RuleSet,
    allow: RuleSet,
}

impl PolicyEngine {
    pub fn new(deny: RuleSet, allow: RuleSet) -> Self {
        Self { deny, allow }
    }

    /// Load both rule files from `conf_dir`. A missing configuration
    /// directory disables all restrictions.
    pub fn load(conf_dir: &Path) -> Result<Self, PolicyError> {
        if !conf_dir.is_dir() {
            warn!(
                "configuration directory {} does not exist or is not a directory, disabling naming restrictions",
                conf_dir.display()
            );
            return Ok(Self::default());
        }
        let deny = RuleSet::load(&conf_dir.join(DENY_RULES_FILE))?;
        let allow = RuleSet::load(&conf_dir.join(ALLOW_RULES_FILE))?;
        info!(
            "loaded {} deny and {} allow rules from {}",
            deny.len(),
            allow.len(),
            conf_dir.display()
        );
        Ok(Self::new(deny, allow))
    }

    /// Evaluate a virtual path. Deny rules win over allow rules; an empty
    /// allow list places no restriction of its own. Denials are logged
    /// with the list that caused them.
    pub fn evaluate(&self, path: &str) -> Decision {
        if let Some(rule) = self.deny.first_match(path) {
            warn!("{path} denied by rule {}", rule.as_str());
            return Decision::Deny;
        }
        if !self.allow.is_empty() && self.allow.first_match(path).is_none() {
            warn!("{path} not allowed");
            return Decision::Deny;
        }
        Decision::Allow
    }
}
