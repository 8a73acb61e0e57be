//! Static pre-execution safety check for synthesized actions.
//!
//! A pure substring scan: nothing is parsed or executed. A violation halts the
//! whole run rather than retrying the instruction.

use thiserror::Error;

/// Any action containing this substring is rejected.
pub const IMPORT_STATEMENT: &str = "import ";

/// Library and capability names that must never appear in an action.
pub const DENYLIST: &[&str] = &["shutil", "requests", "urllib", "subprocess", "socket"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("action contains disallowed token `{token}`")]
pub struct Violation {
    pub token: &'static str,
}

/// Return the first disallowed token found in `action`.
pub fn check(action: &str) -> Result<(), Violation> {
    if action.contains(IMPORT_STATEMENT) {
        return Err(Violation {
            token: IMPORT_STATEMENT,
        });
    }
    match DENYLIST.iter().copied().find(|token| action.contains(token)) {
        Some(token) => Err(Violation { token }),
        None => Ok(()),
    }
}

pub fn is_safe(action: &str) -> bool {
    check(action).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_actions_pass() {
        assert!(is_safe("navigate(\"example.com\")\nwait(1)"));
    }

    #[test]
    fn import_anywhere_is_rejected() {
        assert_eq!(
            check("wait(1)\nimport os").unwrap_err(),
            Violation {
                token: IMPORT_STATEMENT
            }
        );
        assert!(!is_safe("save(\"import x\", \"f.txt\")"));
    }

    #[test]
    fn denylisted_tokens_are_rejected() {
        for token in DENYLIST {
            let action = format!("query_llm(\"{token}\")");
            assert_eq!(check(&action).unwrap_err().token, *token);
        }
    }

    #[test]
    fn important_is_not_an_import() {
        assert!(is_safe("query_llm(\"what is important here?\")"));
    }
}
