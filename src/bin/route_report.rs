//! Route report
//!
//! Loads a topology snapshot exported from the entity store and prints one of the
//! engine's outputs as JSON: the bandwidth overview (default), the failure
//! classification, the local routes or the forwarding feed.
//!
//! Usage: route_report SNAPSHOT.json [OPTIONS]

use netcfg::telemetry;
use netcfg::{Engine, EngineConfig, EngineError, FailureImpact, LinkId, NodeId, Topology};
use serde::Serialize;
use std::collections::BTreeMap;
use std::process::ExitCode;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Report {
    Bandwidth,
    Classification,
    Local,
    Forwarding,
}

#[derive(Debug)]
struct ReportConfig {
    snapshot: Option<String>,
    config: Option<String>,
    failed_link: Option<LinkId>,
    failed_node: Option<NodeId>,
    report: Report,
    json_logs: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            snapshot: None,
            config: None,
            failed_link: None,
            failed_node: None,
            report: Report::Bandwidth,
            json_logs: false,
        }
    }
}

#[derive(Serialize)]
struct ClassificationReport<'a> {
    nodes: BTreeMap<&'a NodeId, FailureImpact>,
    links: BTreeMap<&'a LinkId, FailureImpact>,
    components: usize,
}

fn print_usage() {
    println!("Usage: route_report SNAPSHOT.json [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH      Engine configuration (JSON)");
    println!("      --failed-link ID   Evaluate with this link failed");
    println!("      --failed-node ID   Evaluate with this node failed");
    println!("      --classify         Print the failure classification");
    println!("      --local            Print per-switch primary and backup ports");
    println!("      --forwarding       Print the forwarding feed");
    println!("      --json-logs        Emit logs as JSON");
    println!("  -h, --help             Show this help");
}

fn run(options: &ReportConfig, snapshot: &str) -> Result<String, EngineError> {
    let config = match &options.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    let topology = Topology::from_json_str(&std::fs::read_to_string(snapshot)?)?;

    let start = Instant::now();
    let engine = Engine::new(topology, config)?;
    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "primary routes computed"
    );

    let output = match options.report {
        Report::Bandwidth => serde_json::to_string_pretty(
            &engine.query_bandwidth(options.failed_link.clone(), options.failed_node.clone())?,
        )?,
        Report::Classification => {
            let classification = engine.classification();
            let report = ClassificationReport {
                nodes: classification.nodes().collect(),
                links: classification.links().collect(),
                components: classification.component_count(),
            };
            serde_json::to_string_pretty(&report)?
        }
        Report::Local => serde_json::to_string_pretty(&engine.local_routes()?)?,
        Report::Forwarding => serde_json::to_string_pretty(&engine.forwarding_feed()?)?,
    };
    Ok(output)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ReportConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    options.config = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--failed-link" => {
                if i + 1 < args.len() {
                    options.failed_link = Some(LinkId::new(args[i + 1].as_str()));
                    i += 1;
                }
            }
            "--failed-node" => {
                if i + 1 < args.len() {
                    options.failed_node = Some(NodeId::new(args[i + 1].as_str()));
                    i += 1;
                }
            }
            "--classify" => options.report = Report::Classification,
            "--local" => options.report = Report::Local,
            "--forwarding" => options.report = Report::Forwarding,
            "--json-logs" => options.json_logs = true,
            "--help" | "-h" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            other if options.snapshot.is_none() && !other.starts_with('-') => {
                options.snapshot = Some(other.to_string());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                return ExitCode::from(2);
            }
        }
        i += 1;
    }

    if options.json_logs {
        telemetry::init_json_logging("info");
    } else {
        telemetry::init_logging("info");
    }

    let Some(snapshot) = options.snapshot.clone() else {
        print_usage();
        return ExitCode::from(2);
    };

    match run(&options, &snapshot) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) if e.is_caller_error() => {
            eprintln!("Invalid request: {}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
