use regex::Regex;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Exclusions that apply to every workspace regardless of its `.gitignore`.
/// They are appended after user rules and cannot be un-ignored.
pub const BUILTIN_PATTERNS: &[&str] = &[
    // Dependencies
    "node_modules/**",
    "bower_components/**",
    "jspm_packages/**",
    // Build outputs
    "out/**",
    "dist/**",
    "build/**",
    "target/**",
    "bin/**",
    "obj/**",
    // Framework specific
    ".next/**",
    ".nuxt/**",
    ".vuepress/dist/**",
    ".docusaurus/**",
    // Version control
    ".git/**",
    ".svn/**",
    ".hg/**",
    // IDE/Editor
    ".vscode/**",
    ".idea/**",
    "*.swp",
    "*.swo",
    "*~",
    // OS generated
    ".DS_Store",
    ".DS_Store?",
    "._*",
    ".Spotlight-V100",
    ".Trashes",
    "ehthumbs.db",
    "Thumbs.db",
    // Logs
    "*.log",
    "logs/**",
    "npm-debug.log*",
    "yarn-debug.log*",
    "yarn-error.log*",
    // Runtime data
    "pids/**",
    "*.pid",
    "*.seed",
    "*.pid.lock",
    // Coverage
    "coverage/**",
    ".nyc_output/**",
    // Caches
    ".npm/**",
    ".eslintcache",
    ".rpt2_cache/",
    ".rts2_cache_cjs/",
    ".rts2_cache_es/",
    ".rts2_cache_umd/",
    ".node_repl_history",
    ".yarn-integrity",
    ".cache",
    ".parcel-cache",
    ".serverless",
    ".fusebox/",
    ".dynamodb/",
    // Secrets
    ".env",
    ".env.local",
    ".env.development.local",
    ".env.test.local",
    ".env.production.local",
    // Packages and compiled artifacts
    "*.tgz",
    "*.vsix",
    "*.com",
    "*.class",
    "*.dll",
    "*.exe",
    "*.o",
    "*.so",
    // Archives
    "*.7z",
    "*.dmg",
    "*.gz",
    "*.iso",
    "*.jar",
    "*.rar",
    "*.tar",
    "*.zip",
    // Source maps
    "*.map",
    // Lock files
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    // Minified files
    "*.min.js",
    "*.min.css",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IgnoreError {
    #[error("Malformed ignore pattern {pattern:?}: {reason}")]
    MalformedPattern { pattern: String, reason: String },

    #[error("Negated ignore patterns are not supported: {0:?}")]
    Negation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOrigin {
    User,
    Builtin,
}

/// A single compiled ignore pattern. A rule that failed to compile keeps its
/// source but never matches.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    source: String,
    origin: RuleOrigin,
    regex: Option<Regex>,
}

impl IgnoreRule {
    fn compile(pattern: &str, origin: RuleOrigin) -> (Self, Option<IgnoreError>) {
        let compiled = glob_to_regex(pattern).and_then(|source| {
            Regex::new(&source).map_err(|e| IgnoreError::MalformedPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
        });

        let (regex, error) = match compiled {
            Ok(regex) => (Some(regex), None),
            Err(e) => (None, Some(e)),
        };

        let rule = Self {
            source: pattern.to_string(),
            origin,
            regex,
        };
        (rule, error)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn origin(&self) -> RuleOrigin {
        self.origin
    }

    pub fn is_malformed(&self) -> bool {
        self.regex.is_none()
    }

    fn matches(&self, candidate: &str) -> bool {
        self.regex
            .as_ref()
            .is_some_and(|regex| regex.is_match(candidate))
    }
}

/// Predicate over workspace-relative paths built from gitignore-style globs.
///
/// Every rule is anchored to the whole relative path. A path is ignored when
/// any rule matches the path itself or one of its ancestor directories, so a
/// directory pattern hides everything beneath it.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    rules: Vec<IgnoreRule>,
    errors: Vec<IgnoreError>,
}

impl IgnoreMatcher {
    /// Compiles user patterns followed by [`BUILTIN_PATTERNS`].
    pub fn compile<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        let mut errors = Vec::new();

        for line in patterns {
            let Some(pattern) = clean_line(line.as_ref()) else {
                continue;
            };
            if pattern.starts_with('!') {
                warn!(pattern, "Dropping negated ignore pattern");
                errors.push(IgnoreError::Negation(pattern.to_string()));
                continue;
            }
            push_rule(&mut rules, &mut errors, pattern, RuleOrigin::User);
        }

        for pattern in BUILTIN_PATTERNS {
            push_rule(&mut rules, &mut errors, pattern, RuleOrigin::Builtin);
        }

        Self { rules, errors }
    }

    /// Reads `<root>/.gitignore` (when present) and compiles it together with
    /// any extra configured patterns.
    pub fn load(root: &Path, extra_patterns: &[String]) -> Self {
        let gitignore_path = root.join(".gitignore");
        let mut patterns: Vec<String> = match std::fs::read_to_string(&gitignore_path) {
            Ok(contents) => contents.lines().map(str::to_string).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(?gitignore_path, ?e, "Failed to read .gitignore, using built-in rules only");
                Vec::new()
            }
        };
        patterns.extend(extra_patterns.iter().cloned());

        let matcher = Self::compile(patterns);
        debug!(
            rules = matcher.rules.len(),
            errors = matcher.errors.len(),
            "Compiled ignore rules for {}",
            root.display()
        );
        matcher
    }

    pub fn is_ignored(&self, relative_path: &str) -> bool {
        self.matched_rule(relative_path).is_some()
    }

    /// Like [`Self::is_ignored`] but also tries the `dir/` form, so rules such
    /// as `node_modules/**` prune the directory itself during a walk.
    pub fn is_ignored_dir(&self, relative_path: &str) -> bool {
        let path = normalize(relative_path);
        if path.is_empty() {
            return false;
        }
        self.is_ignored(&path) || self.is_ignored(&format!("{}/", path.trim_end_matches('/')))
    }

    /// The first rule (user rules before built-ins) that ignores the path.
    pub fn matched_rule(&self, relative_path: &str) -> Option<&IgnoreRule> {
        let path = normalize(relative_path);
        if path.is_empty() {
            return None;
        }
        let candidates = candidates(&path);
        self.rules
            .iter()
            .find(|rule| candidates.iter().any(|candidate| rule.matches(candidate)))
    }

    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    /// Patterns that were dropped or degraded to never-matching rules.
    pub fn errors(&self) -> &[IgnoreError] {
        &self.errors
    }
}

fn push_rule(
    rules: &mut Vec<IgnoreRule>,
    errors: &mut Vec<IgnoreError>,
    pattern: &str,
    origin: RuleOrigin,
) {
    let (rule, error) = IgnoreRule::compile(pattern, origin);
    if let Some(error) = error {
        warn!(%error, "Ignore pattern will never match");
        errors.push(error);
    }
    rules.push(rule);
}

fn clean_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    // Rules are always anchored, a leading slash adds nothing.
    let line = line.trim_start_matches('/');
    (!line.is_empty()).then_some(line)
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut path = path.as_str();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.trim_start_matches('/').to_string()
}

/// The path itself followed by every ancestor directory, both with and
/// without a trailing separator.
fn candidates(path: &str) -> Vec<&str> {
    let mut out = vec![path];
    for (idx, _) in path.match_indices('/') {
        if idx == 0 {
            continue;
        }
        out.push(&path[..idx]);
        out.push(&path[..=idx]);
    }
    out
}

fn glob_to_regex(pattern: &str) -> Result<String, IgnoreError> {
    let malformed = |reason: &str| IgnoreError::MalformedPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let glob = match pattern.strip_suffix('/') {
        Some(dir) => format!("{dir}/**"),
        None => pattern.to_string(),
    };
    let chars: Vec<char> = glob.chars().collect();

    let mut out = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let segment_start = i == 0 || chars[i - 1] == '/';
                if segment_start && chars.get(i + 2) == Some(&'/') {
                    // `**/` spans zero or more whole segments
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => {
                let mut j = i + 1;
                let mut class = String::from("[");
                if matches!(chars.get(j), Some('!') | Some('^')) {
                    class.push('^');
                    j += 1;
                }
                let body_start = j;
                loop {
                    match chars.get(j) {
                        None => return Err(malformed("unterminated character class")),
                        Some(']') if j > body_start => break,
                        Some(c) => {
                            if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
                                class.push('\\');
                            }
                            class.push(*c);
                            j += 1;
                        }
                    }
                }
                class.push(']');
                out.push_str(&class);
                i = j + 1;
            }
            '\\' => {
                let Some(escaped) = chars.get(i + 1) else {
                    return Err(malformed("trailing escape"));
                };
                out.push_str(&regex::escape(&escaped.to_string()));
                i += 2;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    Ok(out)
}
