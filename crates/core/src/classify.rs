//! File classification: wildcard pattern rules over a flat listing.
//!
//! Patterns use shell-style wildcards matched against the whole path:
//! `*` matches any run of characters, including `/`, and `?` matches
//! exactly one. Rules apply in document order: an include rule appends
//! every matching path not already present, an exclude rule removes
//! every previously accumulated match. Order strictly determines the
//! outcome; there is no priority between rule kinds.
//!
//! Classification is pure and deterministic: the same listing and
//! rules always produce the same ordered set, which keeps archive
//! manifests reproducible.

/// One `<files pattern="…" exclude="…"/>` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRule {
    pub pattern: String,
    pub exclude: bool,
}

impl PatternRule {
    pub fn include(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            exclude: false,
        }
    }

    pub fn exclude(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            exclude: true,
        }
    }
}

/// Full-string wildcard match; `*` crosses `/`.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            // Backtrack: let the last star swallow one more byte.
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Apply `rules` in order against `listing`, producing the package's
/// ordered file set.
pub fn classify(listing: &[String], rules: &[PatternRule]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for rule in rules {
        if rule.exclude {
            out.retain(|f| !wildcard_match(&rule.pattern, f));
        } else {
            for f in listing {
                if wildcard_match(&rule.pattern, f) && !out.contains(f) {
                    out.push(f.clone());
                }
            }
        }
    }
    out
}
