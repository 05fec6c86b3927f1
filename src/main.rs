use chunkscope::{
    DataDir,
    Engine,
    api::{IndexRequest, MatchView, SearchRequest},
    document::{CONTEXT_TAG, PARENT_TEXT_TAG},
    error,
    ingestion,
    mcp,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, IndexArgs, SearchArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CHUNKSCOPE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let engine = Engine::open(&data_dir, cli.lexicon.as_deref())?;

    match cli.command {
        Command::Index(args) => cmd_index(&engine, &args)?,
        Command::Search(args) => cmd_search(&engine, &args)?,
        Command::Tags(args) => {
            let response = engine.tags(&args.ids)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                for (key, values) in &response.tags {
                    println!("{key}");
                    for (value, count) in values {
                        println!("  {count:>5}  {value}");
                    }
                }
            }
        }
        Command::Delete(args) => {
            let outcome = engine.delete(&args.ids)?;
            println!(
                "Deleted {} documents and {} sentences",
                outcome.documents.len(),
                outcome.chunks.len()
            );
        }
        Command::Clear => {
            engine.clear()?;
            println!("Cleared all documents");
        }
        Command::Status(args) => {
            let status = engine.status()?;
            if args.json {
                let mut value = serde_json::to_value(&status)?;
                value["data_dir"] =
                    serde_json::Value::String(data_dir.root().display().to_string());
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Data directory: {}", data_dir.root().display());
                println!("Embedder: {} (dim {})", status.embedder_id, status.embedding_dim);
                println!(
                    "Tagging: {}",
                    if status.tagging_available { "available" } else { "no lexicon configured" }
                );
                println!("Documents: {}", status.documents);
                println!("Sentences: {}", status.chunks);
            }
        }
        Command::Mcp => mcp::run_mcp(engine)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_index(engine: &Engine, args: &IndexArgs) -> error::Result<()> {
    let files = ingestion::expand_paths(&args.paths);
    let documents = ingestion::read_documents(&files);
    if documents.is_empty() && !args.reload {
        return Err(error::Error::Config(
            "no readable input files found".to_string(),
        ));
    }

    let mut request = IndexRequest::new(documents);
    request.reload = args.reload;
    request.reload_persisted = args.reload_persisted;
    request.tag = args.tag;
    request.tagging_confidence = args.tagging_confidence;

    let report = engine.index(&request)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Indexed {} documents ({} sentences){}; {} documents in store",
            report.documents_added,
            report.chunks_added,
            if report.cache_hit { " from cache" } else { "" },
            report.total_documents
        );
    }
    Ok(())
}

fn cmd_search(engine: &Engine, args: &SearchArgs) -> error::Result<()> {
    let mut request = SearchRequest::new(args.query.clone());
    request.top_k = args.top_k;
    request.context_length = args.context_length;
    request.filter_by_tags = args
        .filters
        .iter()
        .map(|f| [(f.key.clone(), f.value.clone())].into_iter().collect())
        .collect();
    request.filter_by_tags_method = args.filter_method.clone();
    request.rank_by = args.rank;
    request.include_tags = !args.no_tags;

    let response = engine.search(&request)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.matches.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    for (rank, m) in response.matches.iter().enumerate() {
        print_match(rank + 1, m);
    }
    Ok(())
}

fn print_match(rank: usize, m: &MatchView) {
    let Some(tags) = m.tags() else {
        println!("{rank:>3}. [{:.2}] {}", m.score(), m.text());
        return;
    };

    let source = tags.get(PARENT_TEXT_TAG).map(String::as_str).unwrap_or("");
    println!("{rank:>3}. [{:.2}] {}  ({source})", m.score(), m.text());
    if let Some(context) = tags.get(CONTEXT_TAG) {
        println!("     {context}");
    }
    let extra: Vec<String> = tags
        .iter()
        .filter(|(k, _)| k.as_str() != PARENT_TEXT_TAG && k.as_str() != CONTEXT_TAG)
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    if !extra.is_empty() {
        println!("     tags: {}", extra.join(", "));
    }
}
