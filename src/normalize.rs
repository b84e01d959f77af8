//! Rewrites "view in browser" URLs of code and dataset hosts into the URLs
//! that serve the file itself.

use regex::Regex;

use crate::error::FetchwiseError;

const TRACKING_PARAMS: &[&str] = &["utm_source=chatgpt.com"];

#[derive(Debug, Clone)]
pub struct RewriteRule {
    name: String,
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    pub fn new(name: &str, pattern: &str, replacement: &str) -> Result<Self, FetchwiseError> {
        let pattern = Regex::new(pattern)
            .map_err(|err| FetchwiseError::InvalidPattern(format!("{name}: {err}")))?;
        Ok(Self {
            name: name.to_string(),
            pattern,
            replacement: replacement.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, url: &str) -> Option<String> {
        self.pattern
            .is_match(url)
            .then(|| self.pattern.replace(url, self.replacement.as_str()).into_owned())
    }
}

/// Ordered URL rewrite rules; the first matching rule wins.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    rules: Vec<RewriteRule>,
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        let rules = [
            (
                "github_blob",
                r"^https?://(?:www\.)?github\.com/([^/?#]+)/([^/?#]+)/blob/(.+)$",
                "https://raw.githubusercontent.com/${1}/${2}/${3}",
            ),
            (
                "github_raw",
                r"^https?://(?:www\.)?github\.com/([^/?#]+)/([^/?#]+)/raw/(.+)$",
                "https://raw.githubusercontent.com/${1}/${2}/${3}",
            ),
            (
                "gitlab_blob",
                r"^(https?://(?:www\.)?gitlab\.com/[^?#]+?)/-/blob/(.+)$",
                "${1}/-/raw/${2}",
            ),
            (
                "huggingface_blob",
                r"^(https?://(?:www\.)?huggingface\.co/[^?#]+?)/blob/(.+)$",
                "${1}/resolve/${2}",
            ),
        ];
        let rules = rules
            .iter()
            .filter_map(|(name, pattern, replacement)| {
                RewriteRule::new(name, pattern, replacement).ok()
            })
            .collect();
        Self { rules }
    }
}

impl UrlNormalizer {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: RewriteRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// Never fails; unknown URL shapes come back unchanged apart from
    /// tracking parameters.
    pub fn normalize(&self, url: &str) -> String {
        let trimmed = url.trim();
        let rewritten = self
            .rules
            .iter()
            .find_map(|rule| rule.apply(trimmed))
            .unwrap_or_else(|| trimmed.to_string());
        strip_tracking_params(&rewritten)
    }
}

fn strip_tracking_params(url: &str) -> String {
    let (without_fragment, fragment) = match url.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (url, None),
    };
    let Some((base, query)) = without_fragment.split_once('?') else {
        return url.to_string();
    };

    if !query.split('&').any(|pair| TRACKING_PARAMS.contains(&pair)) {
        return url.to_string();
    }
    let kept = query
        .split('&')
        .filter(|pair| !pair.is_empty() && !TRACKING_PARAMS.contains(pair))
        .collect::<Vec<_>>();

    let mut out = base.to_string();
    if !kept.is_empty() {
        out.push('?');
        out.push_str(&kept.join("&"));
    }
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}
