use regex::Regex;

/// Replaces every occurrence of a configured secret in emitted text.
///
/// Built once at startup from all secrets the configuration knows about
/// (database passwords, storage credentials, encryption key) and applied to
/// every log-bound message and webhook payload string.
#[derive(Debug, Clone)]
pub struct Scrubber {
    pattern: Option<Regex>,
}

const MASK: &str = "***";

impl Scrubber {
    /// Builds a scrubber from the given secrets. Empty strings are ignored so
    /// an unset optional secret never turns into a match-everything pattern.
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut escaped: Vec<String> = secrets
            .into_iter()
            .filter(|s| !s.as_ref().is_empty())
            .map(|s| regex::escape(s.as_ref()))
            .collect();
        escaped.sort_unstable();
        escaped.dedup();
        // longest first, so a secret containing another secret masks whole
        escaped.sort_by_key(|s| std::cmp::Reverse(s.len()));

        let pattern = if escaped.is_empty() {
            None
        } else {
            // escaped literals only, so the pattern always compiles
            Some(Regex::new(&escaped.join("|")).expect("escaped literals are a valid pattern"))
        };

        Self { pattern }
    }

    /// A scrubber that passes text through unchanged.
    pub fn noop() -> Self {
        Self { pattern: None }
    }

    pub fn scrub(&self, text: &str) -> String {
        match &self.pattern {
            Some(re) => re.replace_all(text, MASK).into_owned(),
            None => text.to_string(),
        }
    }
}
