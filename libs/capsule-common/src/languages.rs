// Language Tier Registry
// Loads languages.json (or the built-in table) and resolves per-request limits

use crate::error::{CapsuleError, Result};
use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/languages.json";

/// Hard ceilings a request can never exceed
pub const MAX_TIME_LIMIT_SECS: f64 = 30.0;
pub const MAX_MEMORY_LIMIT_MB: u32 = 512;

/// Compile phase budget when the language does not set one
pub const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 15;

/// Per-tier resource defaults
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierDefaults {
    pub memory_limit_mb: u32,
    pub time_limit_secs: f64,
}

impl Tier {
    pub fn defaults(self) -> TierDefaults {
        match self {
            Tier::Interpreted => TierDefaults {
                memory_limit_mb: 128,
                time_limit_secs: 10.0,
            },
            Tier::Queued => TierDefaults {
                memory_limit_mb: 256,
                time_limit_secs: 10.0,
            },
            Tier::Compiled => TierDefaults {
                memory_limit_mb: 256,
                time_limit_secs: 10.0,
            },
        }
    }
}

/// How to name the entry file for class-based languages.
///
/// Patterns are tried in order; the first capture group of the first match
/// wins. Extraction is best-effort, `fallback` is used otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPointRule {
    pub patterns: Vec<String>,
    pub fallback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageSpec {
    pub name: String,
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub file_extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<EntryPointRule>,
    /// Placeholders: {source} {binary} {workdir} {entry} {memory_mb}
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_command: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_timeout_secs: Option<u64>,
}

/// Limits in force for one execution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub memory_limit_mb: u32,
    pub time_limit: Duration,
}

impl LanguageSpec {
    /// Configured default, or the tier's when unset or not a positive number
    pub fn default_time_limit_secs(&self) -> f64 {
        self.time_limit_secs
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or_else(|| self.tier.defaults().time_limit_secs)
            .min(MAX_TIME_LIMIT_SECS)
    }

    pub fn memory_limit_mb(&self) -> u32 {
        self.memory_limit_mb
            .filter(|mb| *mb > 0)
            .unwrap_or_else(|| self.tier.defaults().memory_limit_mb)
            .min(MAX_MEMORY_LIMIT_MB)
    }

    /// Resolve the effective limits for a request.
    ///
    /// A missing, zero, negative or non-finite time limit falls back to the
    /// language default; anything above the hard ceiling is clamped to it.
    pub fn limits(&self, requested_time_limit: Option<f64>) -> ResourceLimits {
        let secs = match requested_time_limit {
            Some(t) if t.is_finite() && t > 0.0 => t,
            _ => self.default_time_limit_secs(),
        };
        ResourceLimits {
            memory_limit_mb: self.memory_limit_mb(),
            time_limit: Duration::from_secs_f64(secs.min(MAX_TIME_LIMIT_SECS)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CapsuleError::Config("language with empty name".to_string()));
        }
        if self.file_extension.trim().is_empty() {
            return Err(CapsuleError::Config(format!(
                "language '{}' has no file extension",
                self.name
            )));
        }
        if let Some(t) = self.time_limit_secs {
            if !t.is_finite() || t <= 0.0 {
                return Err(CapsuleError::Config(format!(
                    "language '{}' has an invalid time_limit_secs: {}",
                    self.name, t
                )));
            }
        }
        if self.memory_limit_mb == Some(0) {
            return Err(CapsuleError::Config(format!(
                "language '{}' has a memory_limit_mb of 0",
                self.name
            )));
        }
        if self.tier == Tier::Compiled {
            let run = self.run_command.as_deref().unwrap_or("").trim();
            if run.is_empty() {
                return Err(CapsuleError::Config(format!(
                    "compiled language '{}' needs a run_command",
                    self.name
                )));
            }
            if let Some(compile) = &self.compile_command {
                if !compile.contains("{source}") {
                    return Err(CapsuleError::Config(format!(
                        "compile_command for '{}' must reference {{source}}",
                        self.name
                    )));
                }
            }
        }
        if let Some(rule) = &self.entry_point {
            if rule.fallback.trim().is_empty() {
                return Err(CapsuleError::Config(format!(
                    "entry_point for '{}' needs a fallback name",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// On-disk shape of languages.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguagesFile {
    pub languages: Vec<LanguageSpec>,
}

impl LanguagesFile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CapsuleError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            CapsuleError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Registry of configured languages, the single authority on tiers
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: BTreeMap<String, LanguageSpec>,
    aliases: HashMap<String, String>,
}

impl LanguageRegistry {
    pub fn from_specs(specs: Vec<LanguageSpec>) -> Result<Self> {
        let mut languages = BTreeMap::new();
        let mut aliases = HashMap::new();

        for spec in specs {
            spec.validate()?;
            let name = spec.name.to_lowercase();
            for alias in &spec.aliases {
                aliases.insert(alias.to_lowercase(), name.clone());
            }
            if languages.insert(name.clone(), spec).is_some() {
                return Err(CapsuleError::Config(format!(
                    "language '{}' is configured twice",
                    name
                )));
            }
        }

        if languages.is_empty() {
            return Err(CapsuleError::Config("no languages configured".to_string()));
        }

        Ok(Self { languages, aliases })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_specs(LanguagesFile::read(path)?.languages)
    }

    /// Load `$LANGUAGES_CONFIG`, else config/languages.json, else the built-in table
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var("LANGUAGES_CONFIG") {
            return Self::load(Path::new(&path));
        }
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("{} not found, using built-in language table", DEFAULT_CONFIG_PATH);
            Self::builtin()
        }
    }

    pub fn builtin() -> Result<Self> {
        Self::from_specs(builtin_languages())
    }

    pub fn get(&self, language: &str) -> Option<&LanguageSpec> {
        let key = language.trim().to_lowercase();
        match self.languages.get(&key) {
            Some(spec) => Some(spec),
            None => self
                .aliases
                .get(&key)
                .and_then(|name| self.languages.get(name)),
        }
    }

    pub fn resolve(&self, language: &str) -> Result<&LanguageSpec> {
        self.get(language)
            .ok_or_else(|| CapsuleError::UnsupportedLanguage(language.to_string()))
    }

    pub fn languages(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.languages.values()
    }

    pub fn by_tier(&self, tier: Tier) -> Vec<&LanguageSpec> {
        self.languages.values().filter(|l| l.tier == tier).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.languages.keys().cloned().collect()
    }
}

fn spec(name: &str, tier: Tier, ext: &str) -> LanguageSpec {
    LanguageSpec {
        name: name.to_string(),
        tier,
        aliases: Vec::new(),
        file_extension: ext.to_string(),
        entry_point: None,
        compile_command: None,
        run_command: None,
        env: BTreeMap::new(),
        memory_limit_mb: None,
        time_limit_secs: None,
        compile_timeout_secs: None,
    }
}

fn builtin_languages() -> Vec<LanguageSpec> {
    let mut javascript = spec("javascript", Tier::Interpreted, "js");
    javascript.aliases = vec!["js".to_string(), "node".to_string()];
    let mut typescript = spec("typescript", Tier::Interpreted, "ts");
    typescript.aliases = vec!["ts".to_string()];

    let mut python = spec("python", Tier::Queued, "py");
    python.aliases = vec!["python3".to_string(), "py".to_string()];
    let ruby = spec("ruby", Tier::Queued, "rb");
    let mut bash = spec("bash", Tier::Queued, "sh");
    bash.aliases = vec!["sh".to_string()];

    let mut c = spec("c", Tier::Compiled, "c");
    c.compile_command = Some("gcc -O2 -std=c11 -o {binary} {source} -lm".to_string());
    c.run_command = Some("{binary}".to_string());

    let mut cpp = spec("cpp", Tier::Compiled, "cpp");
    cpp.aliases = vec!["c++".to_string()];
    cpp.compile_command = Some("g++ -O2 -std=c++17 -o {binary} {source}".to_string());
    cpp.run_command = Some("{binary}".to_string());

    let mut java = spec("java", Tier::Compiled, "java");
    java.entry_point = Some(EntryPointRule {
        patterns: vec![
            r"public\s+(?:final\s+|abstract\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)".to_string(),
            r"\bclass\s+([A-Za-z_$][A-Za-z0-9_$]*)".to_string(),
        ],
        fallback: "Main".to_string(),
    });
    java.compile_command = Some("javac -encoding UTF-8 -d {workdir} {source}".to_string());
    java.run_command = Some("java -Xmx{memory_mb}m -Xss64m -cp {workdir} {entry}".to_string());
    java.compile_timeout_secs = Some(10);

    let mut go = spec("go", Tier::Compiled, "go");
    go.aliases = vec!["golang".to_string()];
    go.compile_command = Some("go build -o {binary} {source}".to_string());
    go.run_command = Some("{binary}".to_string());
    go.env.insert("CGO_ENABLED".to_string(), "0".to_string());
    go.env.insert("GOCACHE".to_string(), "{workdir}/.gocache".to_string());
    go.env.insert("HOME".to_string(), "{workdir}".to_string());

    let mut rust = spec("rust", Tier::Compiled, "rs");
    rust.compile_command = Some("rustc -O -o {binary} {source}".to_string());
    rust.run_command = Some("{binary}".to_string());

    vec![javascript, typescript, python, ruby, bash, c, cpp, java, go, rust]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert_eq!(registry.resolve("python").unwrap().tier, Tier::Queued);
        assert_eq!(registry.resolve("cpp").unwrap().tier, Tier::Compiled);
        assert_eq!(registry.resolve("javascript").unwrap().tier, Tier::Interpreted);
    }

    #[test]
    fn test_alias_and_case_lookup() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert_eq!(registry.resolve("C++").unwrap().name, "cpp");
        assert_eq!(registry.resolve("  Python3 ").unwrap().name, "python");
    }

    #[test]
    fn test_unknown_language_rejected() {
        let registry = LanguageRegistry::builtin().unwrap();
        let err = registry.resolve("cobol").unwrap_err();
        assert!(matches!(err, CapsuleError::UnsupportedLanguage(ref l) if l == "cobol"));
    }

    #[test]
    fn test_limits_default_and_clamp() {
        let registry = LanguageRegistry::builtin().unwrap();
        let cpp = registry.resolve("cpp").unwrap();

        assert_eq!(cpp.limits(None).time_limit, Duration::from_secs(10));
        assert_eq!(cpp.limits(Some(2.0)).time_limit, Duration::from_secs(2));
        assert_eq!(cpp.limits(Some(600.0)).time_limit, Duration::from_secs(30));
        assert_eq!(cpp.limits(Some(0.0)).time_limit, Duration::from_secs(10));
        assert_eq!(cpp.limits(Some(-3.0)).time_limit, Duration::from_secs(10));
        assert_eq!(cpp.limits(Some(f64::NAN)).time_limit, Duration::from_secs(10));
    }

    #[test]
    fn test_memory_ceiling() {
        let mut s = spec("big", Tier::Compiled, "c");
        s.run_command = Some("{binary}".to_string());
        s.memory_limit_mb = Some(4096);
        assert_eq!(s.memory_limit_mb(), MAX_MEMORY_LIMIT_MB);
    }

    #[test]
    fn test_compiled_requires_run_command() {
        let s = spec("broken", Tier::Compiled, "x");
        assert!(LanguageRegistry::from_specs(vec![s]).is_err());
    }

    #[test]
    fn test_duplicate_language_rejected() {
        let a = spec("python", Tier::Queued, "py");
        let b = spec("Python", Tier::Interpreted, "py");
        assert!(LanguageRegistry::from_specs(vec![a, b]).is_err());
    }

    #[test]
    fn test_bad_limit_overrides_rejected() {
        for bad in [-1.0, 0.0, f64::NAN, f64::INFINITY] {
            let mut s = spec("lua", Tier::Interpreted, "lua");
            s.time_limit_secs = Some(bad);
            assert!(LanguageRegistry::from_specs(vec![s]).is_err(), "accepted {}", bad);
        }

        let mut s = spec("lua", Tier::Interpreted, "lua");
        s.memory_limit_mb = Some(0);
        assert!(LanguageRegistry::from_specs(vec![s]).is_err());
    }

    #[test]
    fn test_bad_limit_overrides_fall_back_to_tier_default() {
        // built directly, bypassing registry validation
        let mut s = spec("lua", Tier::Interpreted, "lua");
        s.time_limit_secs = Some(-1.0);
        s.memory_limit_mb = Some(0);
        assert_eq!(s.limits(None).time_limit, Duration::from_secs(10));
        assert_eq!(s.memory_limit_mb(), Tier::Interpreted.defaults().memory_limit_mb);

        s.time_limit_secs = Some(0.0);
        assert_eq!(s.limits(None).time_limit, Duration::from_secs(10));
    }

    #[test]
    fn test_shipped_config_matches_schema() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/languages.json");
        let registry = LanguageRegistry::load(&path).unwrap();
        assert!(registry.get("java").is_some());
        assert!(!registry.by_tier(Tier::Compiled).is_empty());
    }
}
