mod commands;

use anyhow::Result;
use capsule_common::languages::DEFAULT_CONFIG_PATH;
use capsule_common::types::Tier;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "capsule-cli")]
#[command(about = "Capsule CLI - Manage languages and run the judge locally", long_about = None)]
struct Cli {
    /// Path to the languages config
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Interpreted,
    Queued,
    Compiled,
}

impl From<TierArg> for Tier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Interpreted => Tier::Interpreted,
            TierArg::Queued => Tier::Queued,
            TierArg::Compiled => Tier::Compiled,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Add a language to the registry
    AddLang {
        /// Language name (e.g., kotlin, zig)
        #[arg(short, long)]
        name: String,

        /// Execution tier
        #[arg(short, long, value_enum)]
        tier: TierArg,

        /// File extension without the dot (e.g., kt)
        #[arg(short, long)]
        ext: String,

        /// Alternative names, repeatable
        #[arg(short, long = "alias")]
        aliases: Vec<String>,

        /// Compile command template, e.g. "zig build-exe -femit-bin={binary} {source}"
        #[arg(long)]
        compile: Option<String>,

        /// Run command template, e.g. "{binary}"
        #[arg(long)]
        run: Option<String>,

        /// Memory limit in MB
        #[arg(short, long)]
        memory: Option<u32>,

        /// Default time limit in seconds
        #[arg(long)]
        time_limit: Option<f64>,

        /// Compile timeout in seconds
        #[arg(long)]
        compile_timeout: Option<u64>,

        /// Environment for compile and run, KEY=VALUE, repeatable
        #[arg(long = "env")]
        env: Vec<String>,

        /// Entry point regex with one capture group, repeatable
        #[arg(long = "entry-pattern")]
        entry_patterns: Vec<String>,

        /// Entry point name used when no pattern matches
        #[arg(long)]
        entry_fallback: Option<String>,
    },

    /// Remove a language from the registry
    RemoveLang {
        /// Language name
        #[arg(short, long)]
        name: String,

        /// Skip the confirmation prompt
        #[arg(short, long, default_value = "false")]
        yes: bool,
    },

    /// List configured languages
    ListLangs,

    /// Check the config and which compiled toolchains are installed
    Validate,

    /// Compile and run a file with the local judge
    Run {
        /// Language name or alias
        #[arg(short, long)]
        lang: String,

        /// Source file
        file: PathBuf,

        /// File to feed on stdin
        #[arg(long)]
        stdin: Option<PathBuf>,

        /// Time limit in seconds
        #[arg(long)]
        time_limit: Option<f64>,

        /// Entry point name for class-based languages
        #[arg(long)]
        entry_point: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::AddLang {
            name,
            tier,
            ext,
            aliases,
            compile,
            run,
            memory,
            time_limit,
            compile_timeout,
            env,
            entry_patterns,
            entry_fallback,
        } => {
            commands::add_language(
                &cli.config,
                commands::NewLanguage {
                    name,
                    tier: tier.into(),
                    ext,
                    aliases,
                    compile,
                    run,
                    memory,
                    time_limit,
                    compile_timeout,
                    env,
                    entry_patterns,
                    entry_fallback,
                },
            )?;
        }
        Commands::RemoveLang { name, yes } => {
            commands::remove_language(&cli.config, &name, yes)?;
        }
        Commands::ListLangs => {
            commands::list_languages(&cli.config)?;
        }
        Commands::Validate => {
            commands::validate(&cli.config)?;
        }
        Commands::Run {
            lang,
            file,
            stdin,
            time_limit,
            entry_point,
        } => {
            let code = commands::run_file(
                &cli.config,
                &lang,
                &file,
                stdin.as_deref(),
                time_limit,
                entry_point,
            )
            .await?;
            std::process::exit(code);
        }
    }

    Ok(())
}
