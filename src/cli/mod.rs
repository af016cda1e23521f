//! CLI argument parsing for prpflow.
//!
//! Uses clap derive macros for declarative argument definitions.
//! Implementations live in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// prpflow: coordinate agents through knowledge-enriched PRPs.
///
/// A feature request is decomposed into dependent tasks, each task is
/// enriched from the knowledge store into a PRP, claimed by exactly one
/// agent, checked against its validation gates, and its outcome is learned
/// back into the store.
#[derive(Parser, Debug)]
#[command(name = "prpflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log at debug level regardless of configuration.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scaffold `.prpflow/` with a config and an agents file.
    ///
    /// Existing files are kept unless `--force` is given.
    Init(InitArgs),

    /// Plan a feature without running it.
    ///
    /// Decomposes, validates and cycle-checks the feature, then prints the
    /// tasks in dependency waves.
    Validate(ValidateArgs),

    /// Run a feature to completion.
    ///
    /// Starts the agents, submits the feature, waits for its outcome and
    /// writes `.prpflow/status.json`.
    Run(RunArgs),

    /// Show the snapshot written by the last `run`.
    Status(StatusArgs),

    /// Parse and validate a Markdown PRP document.
    Prp(PrpArgs),

    /// Operate on the persistent knowledge store.
    Knowledge(KnowledgeCommand),
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite existing config and agents files.
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Feature request file (YAML).
    pub feature: PathBuf,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Feature request file (YAML).
    pub feature: PathBuf,

    /// Attest every criterion instead of running agent commands.
    #[arg(long)]
    pub dry_run: bool,

    /// Cancel the feature if it has not finished after this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Print the raw JSON snapshot.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct PrpArgs {
    /// Markdown PRP document.
    pub file: PathBuf,
}

#[derive(Parser, Debug)]
pub struct KnowledgeCommand {
    #[command(subcommand)]
    pub action: KnowledgeAction,
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeAction {
    /// Store a new entry.
    Add(KnowledgeAddArgs),

    /// Search by text.
    Query(KnowledgeQueryArgs),

    /// Print one entry.
    Get(KnowledgeIdArgs),

    /// Remove one entry.
    Delete(KnowledgeIdArgs),

    /// Entry counts per source type.
    Stats,
}

#[derive(Parser, Debug)]
pub struct KnowledgeAddArgs {
    /// Entry text.
    pub content: String,

    /// document, code, success-pattern or failure-pattern.
    #[arg(long, default_value = "document")]
    pub source_type: String,

    /// Tags for filtering.
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Metadata as key=value pairs; values are parsed as JSON when possible.
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub metadata: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct KnowledgeQueryArgs {
    /// Text to search for.
    pub text: String,

    /// Number of results.
    #[arg(short, long, default_value_t = 5)]
    pub k: usize,

    /// Only entries of this source type.
    #[arg(long)]
    pub source_type: Option<String>,

    /// Only entries carrying any of these tags.
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct KnowledgeIdArgs {
    /// Entry id.
    pub id: String,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_init() {
        let cli = Cli::try_parse_from(["prpflow", "init"]).unwrap();
        assert!(matches!(cli.command, Command::Init(InitArgs { force: false })));
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::try_parse_from(["prpflow", "run", "feature.yaml"]).unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.feature, PathBuf::from("feature.yaml"));
            assert!(!args.dry_run);
            assert_eq!(args.timeout_secs, None);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn parse_run_full() {
        let cli = Cli::try_parse_from([
            "prpflow",
            "-v",
            "run",
            "feature.yaml",
            "--dry-run",
            "--timeout-secs",
            "30",
        ])
        .unwrap();
        assert!(cli.verbose);
        if let Command::Run(args) = cli.command {
            assert!(args.dry_run);
            assert_eq!(args.timeout_secs, Some(30));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn parse_verbose_after_subcommand() {
        let cli = Cli::try_parse_from(["prpflow", "status", "--verbose", "--json"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Status(StatusArgs { json: true })));
    }

    #[test]
    fn parse_validate() {
        let cli = Cli::try_parse_from(["prpflow", "validate", "f.yaml"]).unwrap();
        if let Command::Validate(args) = cli.command {
            assert_eq!(args.feature, PathBuf::from("f.yaml"));
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn parse_knowledge_add() {
        let cli = Cli::try_parse_from([
            "prpflow",
            "knowledge",
            "add",
            "Use constant-time comparison",
            "--source-type",
            "code",
            "--tags",
            "auth,security",
            "--meta",
            "file=src/auth.rs",
        ])
        .unwrap();
        let Command::Knowledge(KnowledgeCommand {
            action: KnowledgeAction::Add(args),
        }) = cli.command
        else {
            panic!("Expected knowledge add");
        };
        assert_eq!(args.content, "Use constant-time comparison");
        assert_eq!(args.source_type, "code");
        assert_eq!(args.tags, vec!["auth", "security"]);
        assert_eq!(args.metadata, vec!["file=src/auth.rs"]);
    }

    #[test]
    fn parse_knowledge_query_defaults() {
        let cli = Cli::try_parse_from(["prpflow", "knowledge", "query", "login"]).unwrap();
        let Command::Knowledge(KnowledgeCommand {
            action: KnowledgeAction::Query(args),
        }) = cli.command
        else {
            panic!("Expected knowledge query");
        };
        assert_eq!(args.k, 5);
        assert!(args.source_type.is_none());
        assert!(args.tags.is_empty());
    }

    #[test]
    fn parse_knowledge_stats() {
        let cli = Cli::try_parse_from(["prpflow", "knowledge", "stats"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Knowledge(KnowledgeCommand {
                action: KnowledgeAction::Stats
            })
        ));
    }
}
