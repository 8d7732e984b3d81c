//! concept-graph CLI: build and inspect a persistent concept graph.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use concept_graph::config::KnowledgeConfig;
use concept_graph::graph::{ConceptId, RelationKind, Triple};
use concept_graph::knowledge::Knowledge;
use concept_graph::store::SchemaTemplate;

#[derive(Parser)]
#[command(name = "concept-graph", version, about = "Persistent concept graph store")]
struct Cli {
    /// Knowledge store file.
    #[arg(long, global = true, default_value = "knowledge.redb")]
    db: PathBuf,

    /// Schema template to instantiate the store from when it does not exist.
    #[arg(long, global = true)]
    template: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an empty schema template.
    Template {
        /// Where to write the template.
        path: PathBuf,
    },

    /// Ingest triples from a JSON file.
    Ingest {
        /// JSON array of {"subject", "relation", "object", "properties"}.
        #[arg(long)]
        file: PathBuf,
    },

    /// Find concepts by term.
    Query {
        term: String,

        /// Also match labels containing the term as a word.
        #[arg(long)]
        words: bool,
    },

    /// Print the hierarchy below a concept.
    Tree {
        token: String,
    },

    /// List a concept's relations.
    Neighbors {
        token: String,

        /// Only follow this relation kind (e.g. "is_a", "has").
        #[arg(long)]
        kind: Option<String>,
    },

    /// Give a concept a new label.
    Rename {
        token: String,
        label: String,
    },

    /// Remove a concept and its relations.
    Forget {
        token: String,
    },

    /// Export the graph, or the neighborhood of one concept, as JSON.
    Export {
        /// Export only the subgraph around this concept.
        #[arg(long)]
        around: Option<String>,

        /// Hop limit for --around.
        #[arg(long, default_value = "2")]
        depth: usize,
    },

    /// Show store statistics.
    Info,

    /// Delete every concept and relation, keeping the schema.
    Clear,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let kb = match &cli.command {
        Commands::Template { path } => {
            SchemaTemplate::write(path)?;
            println!("Wrote schema template to {}", path.display());
            return Ok(());
        }
        _ => open_store(&cli)?,
    };

    match cli.command {
        Commands::Template { .. } => {}

        Commands::Ingest { file } => {
            let triples = read_triples(&file)?;
            for triple in &triples {
                kb.assert(triple)?;
            }
            println!("Ingested {} triples from {}", triples.len(), file.display());
            println!("{}", kb.info());
        }

        Commands::Query { term, words } => {
            let concepts = if words { kb.search(&term) } else { kb.query(&term) };
            if concepts.is_empty() {
                println!("No concepts match \"{term}\".");
            } else {
                println!("Concepts ({}):", concepts.len());
                for concept in &concepts {
                    println!("  \"{}\" / {}", concept.label, concept.id);
                }
            }
        }

        Commands::Tree { token } => {
            print!("{}", kb.outline(&token)?);
        }

        Commands::Neighbors { token, kind } => {
            let kind = kind.as_deref().map(RelationKind::parse);
            let concept = kb.concept(&token)?;
            let (outgoing, incoming) = kb.relations(&token)?;
            let label_of = |id: ConceptId| {
                kb.with_graph(|g| g.concept(id).map(|c| c.label.clone()))
                    .unwrap_or_else(|| "?".into())
            };
            println!("Concept: \"{}\" / {}", concept.label, concept.id);
            let outgoing: Vec<_> = outgoing
                .iter()
                .filter(|c| kind.as_ref().is_none_or(|k| &c.kind == k))
                .collect();
            if !outgoing.is_empty() {
                println!("  outgoing ({}):", outgoing.len());
                for c in outgoing {
                    println!("    -> {} -> \"{}\"", c.kind, label_of(c.target));
                }
            }
            let incoming: Vec<_> = incoming
                .iter()
                .filter(|c| kind.as_ref().is_none_or(|k| &c.kind == k))
                .collect();
            if !incoming.is_empty() {
                println!("  incoming ({}):", incoming.len());
                for c in incoming {
                    println!("    \"{}\" -> {} ->", label_of(c.source), c.kind);
                }
            }
        }

        Commands::Rename { token, label } => {
            let concept = kb.rename(&token, &label)?;
            println!("Renamed \"{token}\" to \"{}\" / {}", concept.label, concept.id);
        }

        Commands::Forget { token } => {
            let concept = kb.forget(&token)?;
            println!("Forgot \"{}\" / {}", concept.label, concept.id);
        }

        Commands::Export { around, depth } => {
            let snapshot = match around {
                Some(token) => kb.slice(&token, depth)?,
                None => kb.snapshot(),
            };
            let json = serde_json::to_string_pretty(&snapshot).into_diagnostic()?;
            println!("{json}");
        }

        Commands::Info => {
            println!("{}", kb.info());
        }

        Commands::Clear => {
            kb.clear()?;
            println!("Cleared {}", cli.db.display());
        }
    }

    kb.close()?;
    Ok(())
}

fn open_store(cli: &Cli) -> Result<Knowledge> {
    let config = match &cli.config {
        Some(path) => KnowledgeConfig::load(path)?,
        None => KnowledgeConfig::default(),
    };
    Ok(Knowledge::create(&cli.db, cli.template.as_deref(), config)?)
}

fn read_triples(file: &Path) -> Result<Vec<Triple>> {
    let content = std::fs::read_to_string(file).into_diagnostic()?;
    serde_json::from_str(&content).into_diagnostic()
}
