//! Command-line interface for the rulechain rule engine.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rulechain_rules::config::{defaults, env_vars};
use rulechain_rules::{compile, EngineConfig, FactContext, KnowledgeBase, RuleEngine};
use tracing::debug;

/// rulechain - Compile and run forward-chaining rules against JSON facts.
#[derive(Parser, Debug)]
#[command(name = "rulechain")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Knowledge base identity shared by every command.
#[derive(clap::Args, Debug)]
struct KnowledgeBaseArgs {
    /// Rule source file.
    #[arg(required = true)]
    rules: PathBuf,
    /// Knowledge base name (defaults to the file stem).
    #[arg(long)]
    name: Option<String>,
    /// Knowledge base version.
    #[arg(long = "kb-version", default_value = defaults::KNOWLEDGE_BASE_VERSION)]
    kb_version: String,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a rule file and list its rules.
    Check {
        #[command(flatten)]
        kb: KnowledgeBaseArgs,
    },
    /// Print the rules that currently match, in firing order.
    Resolve {
        #[command(flatten)]
        kb: KnowledgeBaseArgs,
        /// Fact binding, NAME=PATH.json (repeatable).
        #[arg(short, long = "fact", value_name = "NAME=PATH")]
        facts: Vec<String>,
    },
    /// Execute the rules and print the outcome with the final facts.
    Run {
        #[command(flatten)]
        kb: KnowledgeBaseArgs,
        /// Fact binding, NAME=PATH.json (repeatable).
        #[arg(short, long = "fact", value_name = "NAME=PATH")]
        facts: Vec<String>,
        /// Maximum rules fired (overrides RULECHAIN_MAX_CYCLES).
        #[arg(long)]
        max_cycles: Option<usize>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Check { kb } => run_check(&kb),
        Command::Resolve { kb, facts } => run_resolve(&kb, &facts),
        Command::Run {
            kb,
            facts,
            max_cycles,
        } => run_execute(&kb, &facts, max_cycles),
    }
}

fn init_logging(verbose: bool) {
    // Check if JSON logging is requested (for production/container environments)
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "rulechain={level},rulechain_rules={level}",
            level = default_level
        ))
    });

    // Logs go to stderr so stdout stays valid JSON.
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Read and compile the rule file.
fn load_knowledge_base(args: &KnowledgeBaseArgs) -> Result<KnowledgeBase> {
    let source = std::fs::read_to_string(&args.rules)
        .with_context(|| format!("Failed to read rules from {}", args.rules.display()))?;
    let name = match &args.name {
        Some(name) => name.clone(),
        None => file_stem(&args.rules),
    };
    let kb = compile(&name, &args.kb_version, &source)
        .with_context(|| format!("Failed to compile {}", args.rules.display()))?;
    debug!(
        name = kb.name(),
        version = kb.version(),
        rules = kb.len(),
        path = %args.rules.display(),
        "Knowledge base compiled"
    );
    Ok(kb)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rules".to_string())
}

/// Bind every `NAME=PATH` pair as a JSON fact.
fn load_facts(bindings: &[String]) -> Result<FactContext> {
    let mut facts = FactContext::new();
    for binding in bindings {
        let (name, path) = parse_binding(binding)?;
        let raw = std::fs::read(path)
            .with_context(|| format!("Failed to read fact '{}' from {}", name, path))?;
        facts.bind_json(name, raw)?;
        debug!(fact = name, path, "Fact bound");
    }
    Ok(facts)
}

fn parse_binding(binding: &str) -> Result<(&str, &str)> {
    match binding.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim(), path.trim()))
        }
        _ => Err(anyhow::anyhow!(
            "Invalid fact binding '{}': expected NAME=PATH",
            binding
        )),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_check(args: &KnowledgeBaseArgs) -> Result<()> {
    let kb = load_knowledge_base(args)?;
    println!(
        "Knowledge base {} v{}: {} rule(s)",
        kb.name(),
        kb.version(),
        kb.len()
    );
    for rule in kb.rules() {
        match &rule.description {
            Some(description) => println!(
                "  {} (salience {}) - {}",
                rule.name, rule.salience, description
            ),
            None => println!("  {} (salience {})", rule.name, rule.salience),
        }
    }
    Ok(())
}

fn run_resolve(args: &KnowledgeBaseArgs, bindings: &[String]) -> Result<()> {
    let kb = load_knowledge_base(args)?;
    let facts = load_facts(bindings)?;
    let engine = RuleEngine::new(EngineConfig::from_env());
    let agenda = engine.fetch_matching_rules(&kb, &facts)?;
    print_json(&agenda)
}

fn run_execute(
    args: &KnowledgeBaseArgs,
    bindings: &[String],
    max_cycles: Option<usize>,
) -> Result<()> {
    let kb = load_knowledge_base(args)?;
    let mut facts = load_facts(bindings)?;

    let mut config = EngineConfig::from_env();
    if let Some(max_cycles) = max_cycles {
        config = config.with_max_cycles(max_cycles);
    }
    let engine = RuleEngine::new(config);
    let outcome = engine.execute(&kb, &mut facts)?;
    debug!(
        cycles = outcome.cycles_run,
        fired = outcome.fired.len(),
        "Execution finished"
    );

    print_json(&serde_json::json!({
        "outcome": outcome,
        "facts": facts.to_json(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binding() {
        assert_eq!(
            parse_binding("json=payment.json").unwrap(),
            ("json", "payment.json")
        );
        assert_eq!(parse_binding("R=a=b.json").unwrap(), ("R", "a=b.json"));
        assert!(parse_binding("payment.json").is_err());
        assert!(parse_binding("=payment.json").is_err());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(Path::new("/tmp/pricing.grl")), "pricing");
        assert_eq!(file_stem(Path::new("/")), "rules");
    }
}
