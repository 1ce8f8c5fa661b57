// Command templates from the language config.
//
// A template is split on whitespace into argv before substitution, so a
// placeholder value containing spaces stays one argument and nothing is ever
// handed to a shell.

use capsule_common::{CapsuleError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Values available to `{source}`, `{binary}`, `{workdir}`, `{entry}` and `{memory_mb}`
#[derive(Debug, Clone)]
pub struct Placeholders {
    pub source: String,
    pub binary: String,
    pub workdir: String,
    pub entry: String,
    pub memory_mb: u32,
}

impl Placeholders {
    pub fn new(workdir: &Path, source: &Path, binary: &Path, entry: &str, memory_mb: u32) -> Self {
        Self {
            source: source.display().to_string(),
            binary: binary.display().to_string(),
            workdir: workdir.display().to_string(),
            entry: entry.to_string(),
            memory_mb,
        }
    }

    pub fn substitute(&self, token: &str) -> String {
        token
            .replace("{source}", &self.source)
            .replace("{binary}", &self.binary)
            .replace("{workdir}", &self.workdir)
            .replace("{entry}", &self.entry)
            .replace("{memory_mb}", &self.memory_mb.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

pub fn expand(template: &str, values: &Placeholders) -> Result<CommandLine> {
    let mut argv = template
        .split_whitespace()
        .map(|token| values.substitute(token));
    let program = argv
        .next()
        .ok_or_else(|| CapsuleError::Config("empty command template".to_string()))?;
    Ok(CommandLine {
        program,
        args: argv.collect(),
    })
}

pub fn expand_env(env: &BTreeMap<String, String>, values: &Placeholders) -> Vec<(String, String)> {
    env.iter()
        .map(|(k, v)| (k.clone(), values.substitute(v)))
        .collect()
}
