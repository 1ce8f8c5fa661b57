// Dispatch Router
// Maps a language to its execution path; the registry is the only input, so
// adding a language never touches this code.

use crate::error::Result;
use crate::languages::LanguageRegistry;
use crate::types::Tier;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Straight to the remote engine, low latency
    InterpretedDirect,
    /// Through the job store and a worker
    Queued,
    /// Synchronous compiled-language judge
    CompiledSync,
}

impl From<Tier> for Route {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Interpreted => Route::InterpretedDirect,
            Tier::Queued => Route::Queued,
            Tier::Compiled => Route::CompiledSync,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::InterpretedDirect => write!(f, "interpreted-direct"),
            Route::Queued => write!(f, "queued"),
            Route::CompiledSync => write!(f, "compiled-sync"),
        }
    }
}

/// Unknown languages fail with `UnsupportedLanguage` before anything is allocated
pub fn route(registry: &LanguageRegistry, language: &str) -> Result<Route> {
    Ok(Route::from(registry.resolve(language)?.tier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapsuleError;

    #[test]
    fn test_route_by_tier() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert_eq!(route(&registry, "javascript").unwrap(), Route::InterpretedDirect);
        assert_eq!(route(&registry, "python").unwrap(), Route::Queued);
        assert_eq!(route(&registry, "java").unwrap(), Route::CompiledSync);
        assert_eq!(route(&registry, "C++").unwrap(), Route::CompiledSync);
    }

    #[test]
    fn test_route_unknown_language() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert!(matches!(
            route(&registry, "brainfuck"),
            Err(CapsuleError::UnsupportedLanguage(_))
        ));
    }
}
