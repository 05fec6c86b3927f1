use std::path::PathBuf;

use chunkscope::{
    api::{DEFAULT_CONTEXT_LENGTH, DEFAULT_FILTER_METHOD, DEFAULT_TOP_K},
    rank::Aggregation,
    tag_index::TagFilter,
    tagger::DEFAULT_TAGGING_CONFIDENCE,
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "chunkscope",
    about = "Sentence-level semantic search over tagged documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Lexicon file (JSON: {"LABEL": ["term", ...]}) used for tagging
    #[arg(long, global = true)]
    pub lexicon: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Split, tag and index text files or directories
    Index(IndexArgs),
    /// Search indexed sentences
    Search(SearchArgs),
    /// Count tag values across the store or selected ids
    Tags(TagsArgs),
    /// Delete documents or individual sentences by id
    Delete(DeleteArgs),
    /// Remove every indexed document
    Clear,
    /// Show store statistics
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    Completions(CompletionsArgs),
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Files or directories (.md and .txt are picked up from directories)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Clear the store before indexing
    #[arg(long)]
    pub reload: bool,

    /// Ignore cached preprocessing results for this input set
    #[arg(long)]
    pub reload_persisted: bool,

    /// Tag sentences with the configured lexicon
    #[arg(long)]
    pub tag: bool,

    /// Minimum tagger confidence for a token to count
    #[arg(long, default_value_t = DEFAULT_TAGGING_CONFIDENCE)]
    pub tagging_confidence: f32,

    /// Output the index report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Number of matches to return
    #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Sentences on each side of a match to include as context
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONTEXT_LENGTH)]
    pub context_length: usize,

    /// Tag filter as key=value (repeatable)
    #[arg(short = 'f', long = "filter", value_parser = parse_filter)]
    pub filters: Vec<TagFilter>,

    /// How multiple filters combine: OR or AND
    #[arg(long, default_value = DEFAULT_FILTER_METHOD)]
    pub filter_method: String,

    /// Rank documents instead of sentences: min, max, mean_min, mean_max
    #[arg(long)]
    pub rank: Option<Aggregation>,

    /// Omit tags and context from the output
    #[arg(long)]
    pub no_tags: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_filter(s: &str) -> Result<TagFilter, String> {
    TagFilter::parse(s)
        .ok_or_else(|| format!("invalid filter '{s}', expected key=value"))
}

// -- Tags --

#[derive(Debug, Parser)]
pub struct TagsArgs {
    /// Document or sentence ids (all when omitted)
    pub ids: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Delete --

#[derive(Debug, Parser)]
pub struct DeleteArgs {
    /// Document or sentence ids
    pub ids: Vec<String>,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "chunkscope",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["chunkscope", "search", "hello"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "hello");
                assert_eq!(args.top_k, 5);
                assert_eq!(args.context_length, 5);
                assert!(args.filters.is_empty());
                assert_eq!(args.filter_method, "OR");
                assert_eq!(args.rank, None);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_filters_and_rank() {
        let cli = Cli::parse_from([
            "chunkscope",
            "search",
            "q",
            "-f",
            "ORG=Acme",
            "--filter",
            "LOC=Berlin",
            "--filter-method",
            "AND",
            "--rank",
            "mean_min",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(
                    args.filters,
                    vec![TagFilter::new("ORG", "Acme"), TagFilter::new("LOC", "Berlin")]
                );
                assert_eq!(args.rank, Some(Aggregation::MeanMin));
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_index_flags() {
        let cli = Cli::parse_from([
            "chunkscope",
            "--lexicon",
            "lex.json",
            "index",
            "docs",
            "--tag",
            "--tagging-confidence",
            "0.8",
            "--reload",
        ]);
        assert_eq!(cli.lexicon, Some(PathBuf::from("lex.json")));
        match cli.command {
            Command::Index(args) => {
                assert!(args.tag && args.reload && !args.reload_persisted);
                assert_eq!(args.tagging_confidence, 0.8);
                assert_eq!(args.paths, vec![PathBuf::from("docs")]);
            }
            _ => panic!("expected index command"),
        }
    }

    #[test]
    fn invalid_filter_is_rejected() {
        assert!(Cli::try_parse_from(["chunkscope", "search", "q", "-f", "novalue"]).is_err());
    }
}
