//! rstreams whitebox conformance runner.
//!
//! # Usage
//!
//! Run every catalog entry against the reference subscriber:
//! ```bash
//! rstreams-tck-conformance --all
//! ```
//!
//! Run one entry against a faulty subscriber:
//! ```bash
//! rstreams-tck-conformance --subject reentrant --case required_spec203_must_not_call_methods_on_subscription_or_publisher_in_on_complete
//! ```
//!
//! List entries with the rules they cover:
//! ```bash
//! rstreams-tck-conformance --list --show-rules
//! ```
//!
//! # Exit Codes
//!
//! - 0: Passed
//! - 1: A required entry failed
//! - 2: Usage or internal error

use std::collections::HashSet;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use owo_colors::OwoColorize;
use rstreams_tck::{Disposition, Outcome, RunReport, TckConfig, catalog, run_rules};
use rstreams_tck_conformance::{Subject, Verification};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "rstreams-tck-conformance")]
#[command(about = "Whitebox conformance runner for rstreams subscribers")]
struct Args {
    /// Run a single catalog entry by name
    #[arg(long)]
    case: Option<String>,

    /// Run every catalog entry
    #[arg(long)]
    all: bool,

    /// List catalog entries
    #[arg(long)]
    list: bool,

    /// Show the rules covered by each entry
    #[arg(long)]
    show_rules: bool,

    /// Subscriber to verify
    #[arg(long, value_enum, default_value_t = Subject::Reference)]
    subject: Subject,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Override the default wait bound (RSTREAMS_TCK_DEFAULT_TIMEOUT_MS)
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// JSON output for a catalog listing.
#[derive(Serialize)]
struct RuleJson {
    name: &'static str,
    rules: &'static [&'static str],
    disposition: Disposition,
    description: &'static str,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.list {
        list_rules(&args);
        return;
    }

    let mut config = TckConfig::from_env();
    if let Some(ms) = args.timeout_ms.filter(|ms| *ms > 0) {
        config = config.with_default_timeout(Duration::from_millis(ms));
    }
    let verification = Verification::new(args.subject).with_config(config);

    let selected: Vec<_> = if let Some(case) = &args.case {
        let selected: Vec<_> = catalog::<Verification>()
            .into_iter()
            .filter(|rule| rule.name == case.as_str())
            .collect();
        if selected.is_empty() {
            eprintln!("Unknown case: {}", case);
            eprintln!("Run `rstreams-tck-conformance --list` to see available cases");
            std::process::exit(2);
        }
        selected
    } else if args.all {
        catalog::<Verification>()
    } else {
        eprintln!("Usage: rstreams-tck-conformance --case <name> [--subject <subject>]");
        eprintln!("       rstreams-tck-conformance --all [--subject <subject>]");
        eprintln!("       rstreams-tck-conformance --list [--show-rules]");
        std::process::exit(2);
    };

    let report = run_rules(&verification, args.subject.as_str(), selected);
    print_report(&report, &args);

    std::process::exit(if report.is_success() { 0 } else { 1 });
}

fn list_rules(args: &Args) {
    let rules = catalog::<Verification>();

    if args.format == Format::Json {
        let output: Vec<RuleJson> = rules
            .iter()
            .map(|rule| RuleJson {
                name: rule.name,
                rules: rule.rules,
                disposition: rule.disposition,
                description: rule.description,
            })
            .collect();
        print_json(&output);
        return;
    }

    println!("Catalog entries:\n");
    for rule in &rules {
        let marker = match rule.disposition {
            Disposition::Required => " ",
            Disposition::NotVerified => "~",
        };
        if args.show_rules {
            println!("{} {} [{}]", marker, rule.name, rule.rules.join(", "));
        } else {
            println!("{} {}", marker, rule.name);
        }
    }

    let required = rules.iter().filter(|r| r.is_required()).count();
    println!("\nTotal: {} entries ({} required)", rules.len(), required);

    let covered: HashSet<&str> = rules
        .iter()
        .filter(|r| r.is_required())
        .flat_map(|r| r.rules.iter().copied())
        .collect();
    println!("Rules verified: {}", covered.len());
}

fn print_report(report: &RunReport, args: &Args) {
    if args.format == Format::Json {
        print_json(report);
        return;
    }

    for rule in &report.rules {
        match &rule.outcome {
            Outcome::Passed => {
                println!("{} {} ({} ms)", "PASS".green(), rule.name, rule.duration_ms)
            }
            Outcome::Skipped(reason) => println!("{} {} ({})", "SKIP".yellow(), rule.name, reason),
            Outcome::Failed(reason) => {
                println!("{} {}", "FAIL".red(), rule.name);
                println!("  {}", reason);
            }
        }
    }
    println!(
        "\n{}: {} passed, {} failed, {} skipped",
        report.subject.bold(),
        report.passed(),
        report.failed(),
        report.skipped()
    );
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("failed to serialize output: {}", e);
            std::process::exit(2);
        }
    }
}
