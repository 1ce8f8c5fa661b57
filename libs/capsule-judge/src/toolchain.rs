// Toolchain discovery: a compiled language is only offered when the program
// its command templates start with can be found.

use capsule_common::languages::LanguageSpec;
use std::path::{Path, PathBuf};

/// Resolve `program` the way `execvp` would: names containing a slash are
/// taken as paths, bare names are searched on `PATH`
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        return is_executable(path).then(|| path.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// The program the judge must find for this language: the compiler when
/// there is a compile step, otherwise the runner. Placeholders such as
/// `{binary}` point into the workspace and need nothing installed.
pub fn required_program(spec: &LanguageSpec) -> Option<&str> {
    let template = spec
        .compile_command
        .as_deref()
        .or(spec.run_command.as_deref())?;
    template
        .split_whitespace()
        .next()
        .filter(|program| !program.contains('{'))
}

pub fn is_available(spec: &LanguageSpec) -> bool {
    match required_program(spec) {
        Some(program) => find_program(program).is_some(),
        None => true,
    }
}

/// Like `is_available`, but checks every program the language needs (compiler and runner)
pub fn missing_programs(spec: &LanguageSpec) -> Vec<String> {
    [spec.compile_command.as_deref(), spec.run_command.as_deref()]
        .into_iter()
        .flatten()
        .filter_map(|template| template.split_whitespace().next())
        .filter(|program| !program.contains('{'))
        .filter(|program| find_program(program).is_none())
        .map(str::to_string)
        .collect()
}
