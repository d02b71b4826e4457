//! CLI entry point for iamscope.
//!
//! Designed for pipeline use: reads JSON (a collected-data document or a
//! graph export) from stdin or `--graph`, writes JSON results to stdout,
//! logs to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use iamscope_analyze::PathAnalyzer;
use iamscope_core::config::IamscopeConfig;
use iamscope_graph::{CollectedData, GraphBuilder, GraphExport, IamGraph};
use iamscope_query::{GraphQuery, QueryError, Simulator};

#[derive(Parser)]
#[command(name = "iamscope")]
#[command(about = "IAM attack-path analysis over a collected cloud snapshot")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: iamscope).
    #[arg(short, long, default_value = "iamscope", global = true)]
    config: String,

    /// Graph export file. Defaults to reading from stdin.
    #[arg(short, long, global = true)]
    graph: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Build a graph from a collected-data document (stdin) and print its export.
    Build,
    /// Analyze a graph export and print the analysis result.
    Analyze,
    /// Query paths, permissions, or accessible resources for an identity.
    Query {
        /// Source identity (node id or email).
        #[arg(long = "from")]
        from: String,
        /// Target node or resource (required for path queries).
        #[arg(long = "to")]
        to: Option<String>,
        #[arg(long = "type", value_enum, default_value = "paths")]
        query_type: QueryType,
    },
    /// Print the shortest attack path between two nodes.
    Shortest {
        /// Source node id.
        #[arg(long)]
        source: String,
        /// Target node id.
        #[arg(long)]
        target: String,
    },
    /// Simulate an IAM binding change and print the risk delta.
    Simulate {
        #[arg(long, value_enum)]
        action: ActionArg,
        /// Member identity (e.g. user:alice@example.com).
        #[arg(short, long)]
        member: String,
        /// Role name (e.g. roles/editor).
        #[arg(short, long)]
        role: String,
        /// Resource (e.g. projects/my-project).
        #[arg(short = 'R', long)]
        resource: String,
        /// New role for the change action.
        #[arg(long)]
        new_role: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryType {
    Paths,
    Permissions,
    Access,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Add,
    Remove,
    Change,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = IamscopeConfig::load(&cli.config)?;

    match &cli.command {
        Command::Build => {
            let input = std::io::read_to_string(std::io::stdin())?;
            let doc = CollectedData::from_json(&input)?;
            let graph = GraphBuilder::build_from_collected_data(&doc);
            println!("{}", GraphExport::from_graph(&graph).to_json()?);
        }
        Command::Analyze => {
            let graph = load_graph(&cli)?;
            let result = PathAnalyzer::new(config).analyze_all_paths(&graph);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Query {
            from,
            to,
            query_type,
        } => {
            let graph = load_graph(&cli)?;
            let query = GraphQuery::new(&graph, config);

            let source = query
                .resolve_identity(from)
                .ok_or_else(|| QueryError::Unresolvable { value: from.clone() })?;

            match query_type {
                QueryType::Paths => {
                    let to = to
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("--to is required for path queries"))?;
                    let target = query
                        .resolve_identity(to)
                        .or_else(|| query.resolve_resource(to))
                        .ok_or_else(|| QueryError::Unresolvable { value: to.to_string() })?;
                    let paths = query.find_all_paths(&source, &target, None);
                    println!("{}", serde_json::to_string_pretty(&paths)?);
                }
                QueryType::Permissions => {
                    let permissions = query.get_node_permissions(&source);
                    println!("{}", serde_json::to_string_pretty(&permissions)?);
                }
                QueryType::Access => {
                    let paths = query.analyzer().find_paths_from_identity(&graph, &source);
                    println!("{}", serde_json::to_string_pretty(&paths)?);
                }
            }
        }
        Command::Shortest { source, target } => {
            let graph = load_graph(&cli)?;
            let query = GraphQuery::new(&graph, config);
            let source = query
                .resolve_identity(source)
                .ok_or_else(|| QueryError::Unresolvable { value: source.clone() })?;
            let target = query
                .resolve_identity(target)
                .or_else(|| query.resolve_resource(target))
                .ok_or_else(|| QueryError::Unresolvable { value: target.clone() })?;
            let path = query.find_shortest_path(&source, &target);
            println!("{}", serde_json::to_string_pretty(&path)?);
        }
        Command::Simulate {
            action,
            member,
            role,
            resource,
            new_role,
        } => {
            let graph = load_graph(&cli)?;
            let simulator = Simulator::new(graph, config);
            let result = match action {
                ActionArg::Add => simulator.simulate_binding_addition(member, role, resource),
                ActionArg::Remove => simulator.simulate_binding_removal(member, role, resource),
                ActionArg::Change => {
                    let new_role = new_role
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("--new-role is required for change"))?;
                    simulator.simulate_role_change(member, role, new_role, resource)
                }
            };
            let failed = result.error.is_some();
            println!("{}", serde_json::to_string_pretty(&result)?);
            if failed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_graph(cli: &Cli) -> anyhow::Result<IamGraph> {
    let export = match &cli.graph {
        Some(path) => GraphExport::load_from_file(path)?,
        None => {
            let input = std::io::read_to_string(std::io::stdin())?;
            GraphExport::from_json(&input)?
        }
    };
    Ok(export.into_graph())
}
