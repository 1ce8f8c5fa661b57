use anyhow::{bail, Context, Result};
use capsule_common::languages::{EntryPointRule, LanguageRegistry, LanguageSpec, LanguagesFile};
use capsule_common::types::{ExecuteRequest, ExecuteResponse, Tier};
use capsule_judge::toolchain;
use capsule_judge::{Judge, JudgeConfig};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

/// Everything `add-lang` collects from the command line
pub struct NewLanguage {
    pub name: String,
    pub tier: Tier,
    pub ext: String,
    pub aliases: Vec<String>,
    pub compile: Option<String>,
    pub run: Option<String>,
    pub memory: Option<u32>,
    pub time_limit: Option<f64>,
    pub compile_timeout: Option<u64>,
    pub env: Vec<String>,
    pub entry_patterns: Vec<String>,
    pub entry_fallback: Option<String>,
}

impl NewLanguage {
    fn into_spec(self) -> Result<LanguageSpec> {
        let mut env = BTreeMap::new();
        for pair in &self.env {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("--env expects KEY=VALUE, got '{}'", pair))?;
            env.insert(key.trim().to_string(), value.to_string());
        }

        let entry_point = match (self.entry_patterns.is_empty(), self.entry_fallback) {
            (true, None) => None,
            (_, fallback) => Some(EntryPointRule {
                patterns: self.entry_patterns,
                fallback: fallback.unwrap_or_else(|| "Main".to_string()),
            }),
        };

        Ok(LanguageSpec {
            name: self.name.trim().to_lowercase(),
            tier: self.tier,
            aliases: self.aliases.iter().map(|a| a.trim().to_lowercase()).collect(),
            file_extension: self.ext.trim_start_matches('.').to_string(),
            entry_point,
            compile_command: self.compile,
            run_command: self.run,
            env,
            memory_limit_mb: self.memory,
            time_limit_secs: self.time_limit,
            compile_timeout_secs: self.compile_timeout,
        })
    }
}

/// Read the languages file; a missing file is an empty list
pub fn load_languages_config(path: &Path) -> Result<LanguagesFile> {
    if !path.exists() {
        return Ok(LanguagesFile::default());
    }
    LanguagesFile::read(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Write the languages file after checking the whole table still loads
pub fn save_languages_config(path: &Path, config: &LanguagesFile) -> Result<()> {
    if !config.languages.is_empty() {
        LanguageRegistry::from_specs(config.languages.clone())
            .context("Refusing to save an invalid language table")?;
    }
    config
        .write(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Add a language and persist the table
pub fn add_language(path: &Path, language: NewLanguage) -> Result<()> {
    let spec = language.into_spec()?;
    println!("🚀 Adding language: {} ({})", spec.name, spec.tier);

    let mut config = load_languages_config(path)?;
    if config.languages.iter().any(|l| l.name == spec.name) {
        bail!("Language '{}' already exists", spec.name);
    }

    let name = spec.name.clone();
    let tier = spec.tier;
    let missing = if tier == Tier::Compiled {
        toolchain::missing_programs(&spec)
    } else {
        Vec::new()
    };

    config.languages.push(spec);
    save_languages_config(path, &config)?;
    println!("✅ Updated {}", path.display());

    for program in missing {
        println!("⚠️  '{}' is not on PATH; {} will show as unavailable", program, name);
    }

    println!();
    println!("✅ Language '{}' added successfully!", name);
    if tier == Tier::Compiled {
        println!("   Restart capsule-judged to pick it up.");
    } else {
        println!("   Restart capsule-api and capsule-worker to pick it up.");
    }
    Ok(())
}

/// Remove a language, asking first unless `skip_confirm`
pub fn remove_language(path: &Path, name: &str, skip_confirm: bool) -> Result<()> {
    let name = name.trim().to_lowercase();
    println!("🗑️  Removing language: {}", name);

    let mut config = load_languages_config(path)?;
    if !config.languages.iter().any(|l| l.name == name) {
        bail!("Language '{}' not found", name);
    }

    if !skip_confirm {
        print!("Continue? (y/N): ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("❌ Aborted");
            return Ok(());
        }
    }

    remove_from(&mut config, &name);
    save_languages_config(path, &config)?;
    println!("✅ Language '{}' removed successfully!", name);
    Ok(())
}

fn remove_from(config: &mut LanguagesFile, name: &str) -> bool {
    let before = config.languages.len();
    config.languages.retain(|l| l.name != name);
    config.languages.len() != before
}

/// Print the configured languages as a table
pub fn list_languages(path: &Path) -> Result<()> {
    let config = load_languages_config(path)?;
    if config.languages.is_empty() {
        println!("No languages configured in {}", path.display());
        return Ok(());
    }

    println!("📋 Configured Languages:\n");
    println!(
        "{:<12} {:<12} {:<6} {:<10} {:<10} {:<20}",
        "NAME", "TIER", "EXT", "MEMORY", "TIME", "ALIASES"
    );
    println!("{}", "─".repeat(100));

    for spec in &config.languages {
        println!(
            "{:<12} {:<12} {:<6} {:<10} {:<10} {:<20}",
            spec.name,
            spec.tier.to_string(),
            spec.file_extension,
            format!("{}MB", spec.memory_limit_mb()),
            format!("{}s", spec.default_time_limit_secs()),
            spec.aliases.join(", "),
        );
    }

    println!("\n✅ Total: {} language(s)", config.languages.len());
    Ok(())
}

/// Load the table through the registry and report toolchains. Fails when the
/// table is invalid; missing compilers are only reported.
pub fn validate(path: &Path) -> Result<()> {
    let registry = LanguageRegistry::load(path)
        .with_context(|| format!("{} is not a valid language table", path.display()))?;
    println!("✅ {} loads: {} language(s)", path.display(), registry.names().len());

    let missing = missing_toolchains(&registry);
    for spec in registry.by_tier(Tier::Compiled) {
        match missing.get(&spec.name) {
            Some(programs) => println!("   ❌ {:<12} missing {}", spec.name, programs.join(", ")),
            None => println!("   ✅ {:<12} toolchain found", spec.name),
        }
    }

    if missing.is_empty() {
        println!("\n✅ All compiled toolchains available");
    } else {
        println!("\n⚠️  {} compiled language(s) unavailable on this host", missing.len());
    }
    Ok(())
}

fn missing_toolchains(registry: &LanguageRegistry) -> BTreeMap<String, Vec<String>> {
    registry
        .by_tier(Tier::Compiled)
        .into_iter()
        .filter_map(|spec| {
            let missing = toolchain::missing_programs(spec);
            (!missing.is_empty()).then(|| (spec.name.clone(), missing))
        })
        .collect()
}

/// Compile and run one file with an in-process judge. Returns the program's
/// exit code so the shell sees it.
pub async fn run_file(
    config_path: &Path,
    language: &str,
    file: &Path,
    stdin: Option<&Path>,
    time_limit: Option<f64>,
    entry_point: Option<String>,
) -> Result<i32> {
    let registry = if config_path.exists() {
        LanguageRegistry::load(config_path)?
    } else {
        LanguageRegistry::builtin()?
    };

    let source_code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let input = match stdin {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let judge = Judge::new(Arc::new(registry), JudgeConfig::from_env()?);
    let request = ExecuteRequest {
        language: language.to_string(),
        source_code,
        input,
        time_limit,
        entry_point,
    };

    let response = ExecuteResponse::from(judge.execute(&request).await?);
    print!("{}", response.stdout);
    io::stdout().flush()?;
    eprint!("{}", response.stderr);

    eprintln!();
    if let Some(compile) = response.compilation_time {
        eprintln!("⏱️  compile {:.3}s", compile);
    }
    eprintln!(
        "{} exit {} in {:.3}s",
        if response.success { "✅" } else { "❌" },
        response.exit_code,
        response.execution_time
    );
    if let Some(error) = &response.error {
        eprintln!("   {}: {}", error.kind.as_str(), error.message);
    }

    Ok(response.exit_code)
}
