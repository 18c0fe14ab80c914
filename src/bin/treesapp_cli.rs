use clap::builder::styling::{AnsiColor, Color, Style, Styles};
use clap::{ColorChoice, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;

use treesapp_rs::config::{ClassifierConfig, ConsensusAlgorithm, PlacementMode};
use treesapp_rs::emitter::CLASSIFICATION_TABLE;
use treesapp_rs::error::TreeSappError;
use treesapp_rs::types::CancellationToken;
use treesapp_rs::{classify_from_files, RunInputs};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "treesapp-rs",
    version = env!("CARGO_PKG_VERSION"),
    about = "Assign taxonomy to phylogenetically placed queries",
    color = ColorChoice::Auto,
    styles = get_styles(),
)]
struct Args {
    /// Build-parameters table describing the reference packages
    #[arg(short = 'r', long)]
    ref_build_params: PathBuf,

    /// Directory containing tax_ids_<name>.txt for each reference package
    #[arg(short, long)]
    taxonomy_dir: PathBuf,

    /// Placement file for a reference package, as CODE=PATH (repeatable)
    #[arg(short, long = "jplace", value_parser = parse_assignment, required = true)]
    jplace: Vec<(String, PathBuf)>,

    /// Where to write the classification table
    #[arg(short, long, default_value = CLASSIFICATION_TABLE)]
    output: PathBuf,

    /// JSON file with classifier settings; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sample name written to every row
    #[arg(short, long)]
    sample: Option<String>,

    /// Minimum like_weight_ratio for a placement to be kept
    #[arg(long)]
    min_lwr: Option<f64>,

    /// Placement policy: best or lca
    #[arg(long)]
    placement_parser: Option<PlacementMode>,

    /// Consensus algorithm: megan, lca* or lcap
    #[arg(short, long)]
    algorithm: Option<ConsensusAlgorithm>,

    /// Abundance table (contig|marker,value)
    #[arg(long)]
    abundance: Option<PathBuf>,

    /// Worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Report every fragment instead of the longest per parent query
    #[arg(long, default_value_t = false)]
    keep_duplicates: bool,
}

fn parse_assignment(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((code, path)) if !code.is_empty() && !path.is_empty() => {
            Ok((code.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected CODE=PATH, got '{}'", s)),
    }
}

fn get_styles() -> Styles {
    Styles::styled()
        .usage(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow))),
        )
        .header(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow))),
        )
        .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::White))))
}

fn spinner(color: &str, message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template(&format!("{{spinner:.{}}} {{msg}}", color))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner
}

fn build_config(args: &Args) -> Result<ClassifierConfig, TreeSappError> {
    let mut config = match &args.config {
        Some(path) => ClassifierConfig::from_json_file(path)?,
        None => ClassifierConfig::default(),
    };
    if let Some(sample) = &args.sample {
        config.sample_name = sample.clone();
    }
    if let Some(min_lwr) = args.min_lwr {
        config.min_lwr = min_lwr;
    }
    if let Some(mode) = args.placement_parser {
        config.placement_parser = mode;
    }
    if let Some(algorithm) = args.algorithm {
        config.algorithm = algorithm;
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    if args.keep_duplicates {
        config.dedup_fragments = false;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<(), TreeSappError> {
    let config = build_config(&args)?;
    let inputs = RunInputs {
        ref_build_params: args.ref_build_params,
        taxonomy_dir: args.taxonomy_dir,
        placements: args.jplace,
        abundance: args.abundance,
    };

    let progress = spinner("green", "Classifying placements...");
    let results = match classify_from_files(&config, &inputs, &CancellationToken::new()) {
        Ok(results) => results,
        Err(e) => {
            progress.abandon_with_message("Classification failed.");
            return Err(e);
        }
    };
    progress.finish_with_message(format!(
        "Classified {} queries ({} unclassified) with {}.",
        results.classified_count(),
        results.unclassified_count(),
        config.algorithm
    ));

    let progress = spinner("yellow", "Writing classification table...");
    results.write_classification_table(&args.output)?;
    progress.finish_with_message(format!("Wrote {}.", args.output.display()));
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}: {}", e.kind(), e);
            ExitCode::from(e.kind().exit_code() as u8)
        }
    }
}
