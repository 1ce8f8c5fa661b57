// Entry-point naming for class-based languages, where the source file must be
// named after its public type

use capsule_common::languages::EntryPointRule;
use capsule_common::{CapsuleError, Result};
use regex::Regex;
use tracing::warn;

/// `[A-Za-z_$][A-Za-z0-9_$]*`
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// First capture of the first pattern that matches, if it names a usable identifier
pub fn extract(rule: &EntryPointRule, source: &str) -> Option<String> {
    for pattern in &rule.patterns {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Skipping invalid entry point pattern");
                continue;
            }
        };
        let found = re
            .captures(source)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|name| is_valid_identifier(name));
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Pick the entry name: an explicit request wins, then extraction, then the fallback.
///
/// An explicit name that is not a plain identifier is rejected; it becomes a
/// file name inside the workspace and a program argument.
pub fn resolve(rule: &EntryPointRule, explicit: Option<&str>, source: &str) -> Result<String> {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        if !is_valid_identifier(name) {
            return Err(CapsuleError::InvalidRequest(format!(
                "entry_point '{}' is not a valid identifier",
                name
            )));
        }
        return Ok(name.to_string());
    }
    Ok(extract(rule, source).unwrap_or_else(|| rule.fallback.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn java_rule() -> EntryPointRule {
        EntryPointRule {
            patterns: vec![
                r"public\s+(?:final\s+|abstract\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)".to_string(),
                r"\bclass\s+([A-Za-z_$][A-Za-z0-9_$]*)".to_string(),
            ],
            fallback: "Main".to_string(),
        }
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_valid_identifier("Main"));
        assert!(is_valid_identifier("_Solution$1"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1Main"));
        assert!(!is_valid_identifier("../etc/passwd"));
        assert!(!is_valid_identifier("Main Class"));
    }

    #[test]
    fn test_public_class_preferred() {
        let source = "class Helper {}\npublic final class Solution { public static void main(String[] a) {} }";
        assert_eq!(resolve(&java_rule(), None, source).unwrap(), "Solution");
    }

    #[test]
    fn test_plain_class_then_fallback() {
        assert_eq!(resolve(&java_rule(), None, "class Foo {}").unwrap(), "Foo");
        assert_eq!(resolve(&java_rule(), None, "interface X {}").unwrap(), "Main");
    }

    #[test]
    fn test_explicit_entry_point() {
        let source = "public class Solution {}";
        assert_eq!(resolve(&java_rule(), Some("Runner"), source).unwrap(), "Runner");
        assert_eq!(resolve(&java_rule(), Some("  "), source).unwrap(), "Solution");
        assert!(matches!(
            resolve(&java_rule(), Some("a/b"), source),
            Err(CapsuleError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_bad_pattern_is_skipped() {
        let rule = EntryPointRule {
            patterns: vec!["(".to_string(), r"class\s+(\w+)".to_string()],
            fallback: "Main".to_string(),
        };
        assert_eq!(extract(&rule, "class Go {}"), Some("Go".to_string()));
    }
}
