/// Pre-execution source scanning against the configured denylist
use crate::config::types::TutorError;

/// A denylisted token found in submitted source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("denylisted token '{token}' at byte {offset}")]
pub struct DenylistHit {
    pub token: String,
    pub offset: usize,
}

impl From<DenylistHit> for TutorError {
    fn from(hit: DenylistHit) -> Self {
        TutorError::DisallowedConstruct(hit.token)
    }
}

/// Scan `source` for any denylisted token, case-insensitively.
///
/// The earliest occurrence in the source wins; ties go to the longer token.
/// Empty tokens are ignored.
pub fn scan_source<S: AsRef<str>>(source: &str, denylist: &[S]) -> Result<(), DenylistHit> {
    let haystack = source.to_lowercase();
    let mut best: Option<(usize, &str)> = None;
    for token in denylist {
        let token = token.as_ref();
        if token.is_empty() {
            continue;
        }
        let needle = token.to_lowercase();
        if let Some(offset) = haystack.find(&needle) {
            let better = match best {
                None => true,
                Some((o, t)) => offset < o || (offset == o && token.len() > t.len()),
            };
            if better {
                best = Some((offset, token));
            }
        }
    }
    match best {
        Some((offset, token)) => {
            log::debug!("Denylist hit on '{}' at byte {}", token, offset);
            Err(DenylistHit {
                token: token.to_string(),
                offset,
            })
        }
        None => Ok(()),
    }
}

/// Token normalization for denylists loaded from configuration
pub mod denylist {
    /// Trim tokens, drop empty ones and remove case-insensitive duplicates.
    pub fn normalize(tokens: &[String]) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        let mut out = Vec::new();
        for token in tokens {
            let trimmed = token.trim();
            if trimmed.is_empty() {
                continue;
            }
            let folded = trimmed.to_lowercase();
            if seen.contains(&folded) {
                continue;
            }
            seen.push(folded);
            out.push(trimmed.to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::DEFAULT_DENYLIST;
    use crate::config::types::ErrorKind;

    #[test]
    fn clean_source_passes() {
        assert!(scan_source("x = [1, 2]\nprint(len(x))", DEFAULT_DENYLIST).is_ok());
    }

    #[test]
    fn match_is_case_insensitive() {
        let hit = scan_source("IMPORT OS\n", DEFAULT_DENYLIST).unwrap_err();
        assert_eq!(hit.token, "import os");
        assert_eq!(hit.offset, 0);
    }

    #[test]
    fn earliest_token_wins() {
        let hit = scan_source("f = open('x')\nimport sys", DEFAULT_DENYLIST).unwrap_err();
        assert_eq!(hit.token, "open(");
    }

    #[test]
    fn blocks_innocent_substrings_too() {
        // list.remove is caught by the bare "remove" token
        let hit = scan_source("xs = [1]\nxs.remove(1)", DEFAULT_DENYLIST).unwrap_err();
        assert_eq!(hit.token, "remove");
    }

    #[test]
    fn hit_converts_to_disallowed_construct() {
        let hit = scan_source("eval('1')", DEFAULT_DENYLIST).unwrap_err();
        let err: TutorError = hit.into();
        assert_eq!(err.kind(), ErrorKind::DisallowedConstruct);
        assert!(err.to_string().contains("eval("));
    }

    #[test]
    fn normalize_drops_blanks_and_duplicates() {
        let tokens = vec![" Open( ".to_string(), "".to_string(), "open(".to_string()];
        assert_eq!(denylist::normalize(&tokens), vec!["Open(".to_string()]);
    }
}
