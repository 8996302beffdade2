mod commands;
mod logging;
mod progress;

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, FindArgs};
use dotenv::dotenv;
use progress::CliReporter;
use sift_duper_core::strategy::registry::{
    COMPARE_CONTENT_HASH, COMPARE_DATE, COMPARE_EMBEDDING, COMPARE_HISTOGRAM, COMPARE_NAME,
    COMPARE_SIZE,
};
use sift_duper_core::{AppConfig, ComparisonOptions, DuplicateGroup, Engine, SyncReport};
use tracing::{error, info, warn};

fn main() -> Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match sift_duper_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let engine = Engine::new(config.clone());

    let outcome = match args.command {
        Some(Commands::Sync { path, no_recursive }) => {
            run_sync(&engine, path.as_deref(), !no_recursive)
        }
        Some(Commands::Find(find)) => run_find(&engine, &config, &find),
        Some(Commands::Sources) => run_sources(&engine),
        Some(Commands::ClearSources) => {
            match prompt_confirm(
                "Are you SURE you want to forget EVERY source and all stored file data?",
                Some(false),
            ) {
                Ok(true) => engine
                    .clear_sources()
                    .map(|removed| println!("{} sources removed", removed))
                    .map_err(Into::into),
                Ok(false) => process::exit(0),
                Err(err) => Err(anyhow::Error::new(err).context("Could not read confirmation")),
            }
        }
        Some(Commands::Forget { dir, name }) => run_forget(&engine, &dir, &name),
        Some(Commands::Show { id }) => run_show(&engine, id),
        Some(Commands::PrintConfig) => {
            serde_json::to_string_pretty(&config)
                .map(|json| println!("{}", json))
                .context("Could not render configuration")
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = outcome {
        error!("Error: {:#}", err);
        process::exit(1);
    }
    Ok(())
}

fn print_sync_report(root: &str, report: &SyncReport) {
    info!(
        "{}: {} files ({} new, {} changed, {} unchanged), {} pruned in {}",
        root,
        format!("{}", report.files_seen).cyan(),
        format!("{}", report.inserted).green(),
        format!("{}", report.updated).yellow(),
        report.unchanged,
        format!("{}", report.pruned).red(),
        format!("{:.2}s", report.duration.as_secs_f64()).green(),
    );
    for unreadable in &report.inaccessible {
        warn!(
            "Not read, kept as is: {} ({})",
            unreadable.path.display(),
            unreadable.reason
        );
    }
}

fn run_sync(engine: &Engine, path: Option<&Path>, recursive: bool) -> Result<()> {
    let reporter = CliReporter::new();

    let Some(path) = path else {
        if engine.config().roots.is_empty() {
            bail!("No --path given and no roots configured");
        }
        for report in engine.sync_configured_roots(&reporter)? {
            print_sync_report(&format!("source {}", report.source_id), &report);
        }
        return Ok(());
    };

    let root = fs::canonicalize(path)
        .with_context(|| format!("Cannot resolve {}", path.display()))?;
    let source_id = engine.register_source(&root)?;
    let report = engine.sync(source_id, &root, recursive, &reporter)?;
    print_sync_report(&root.display().to_string(), &report);
    Ok(())
}

fn comparison_options(config: &AppConfig, args: &FindArgs) -> ComparisonOptions {
    let flags = [
        (args.name, COMPARE_NAME),
        (args.date, COMPARE_DATE),
        (args.size, COMPARE_SIZE),
        (args.hash, COMPARE_CONTENT_HASH),
        (args.histogram.is_some(), COMPARE_HISTOGRAM),
        (args.embedding, COMPARE_EMBEDDING),
    ];

    let mut options = if flags.iter().any(|(set, _)| *set) {
        let mut options = ComparisonOptions::new();
        for (_, key) in flags.iter().filter(|(set, _)| *set) {
            options = options.enable(key);
        }
        options
    } else {
        config.comparison.clone()
    };

    if let Some(method) = args.histogram {
        options = options.with_method(COMPARE_HISTOGRAM, method.name());
    }
    if let Some(threshold) = args.threshold {
        for key in [COMPARE_HISTOGRAM, COMPARE_EMBEDDING] {
            if options.is_enabled(key) {
                options = options.with_threshold(key, threshold);
            }
        }
    }
    if let Some(file_type) = args.file_type {
        options = options.with_extensions(file_type.resolve(&config.file_types));
    }
    options
}

fn print_group(index: usize, group: &DuplicateGroup) {
    println!(
        "{} {} files, {} bytes reclaimable",
        format!("Group {}:", index + 1).bold(),
        group.len(),
        format!("{}", group.wasted_bytes()).red(),
    );
    for file in &group.files {
        println!(
            "  [{}] {} ({} bytes)",
            format!("{}", file.id()).dimmed(),
            file.path.display(),
            file.attributes.size.unwrap_or(0)
        );
    }
}

fn run_find(engine: &Engine, config: &AppConfig, args: &FindArgs) -> Result<()> {
    let source_ids = if args.sources.is_empty() {
        engine.list_sources()?.iter().map(|s| s.id).collect()
    } else {
        args.sources.clone()
    };
    if source_ids.is_empty() {
        bail!("No sources registered; run `sift-duper sync --path DIR` first");
    }

    let options = comparison_options(config, args);
    let reporter = CliReporter::new();
    let groups = engine.find_duplicates(&source_ids, &options, &reporter)?;

    println!();
    for (index, group) in groups.iter().enumerate() {
        print_group(index, group);
    }

    let files: usize = groups.iter().map(|g| g.len()).sum();
    let wasted: i64 = groups.iter().map(|g| g.wasted_bytes()).sum();
    info!(
        "{} groups, {} files with matches, {} bytes reclaimable",
        format!("{}", groups.len()).red(),
        format!("{}", files).red(),
        format!("{}", wasted).red(),
    );
    Ok(())
}

fn run_sources(engine: &Engine) -> Result<()> {
    let sources = engine.list_sources()?;
    if sources.is_empty() {
        println!("No sources registered");
    }
    for source in sources {
        println!("{} {}", format!("[{}]", source.id).cyan(), source.path);
    }
    Ok(())
}

fn run_forget(engine: &Engine, dir: &Path, name: &str) -> Result<()> {
    if engine.delete_file_record(dir, name)? {
        println!("Forgot {}", dir.join(name).display());
    } else {
        println!("No stored record for {}", dir.join(name).display());
    }
    Ok(())
}

fn run_show(engine: &Engine, id: i64) -> Result<()> {
    let Some(file) = engine.get_file(id)? else {
        bail!("No file with id {}", id);
    };
    let present = |stored: bool| if stored { "yes".green() } else { "no".dimmed() };
    let attrs = &file.attributes;

    println!("{} {}", "path:".bold(), file.path.display());
    println!("{} {}", "source:".bold(), file.record.source_id);
    println!(
        "{} {}",
        "size:".bold(),
        attrs.size.map_or("-".to_string(), |s| s.to_string())
    );
    println!(
        "{} {}",
        "modified:".bold(),
        attrs.modified_date.map_or("-".to_string(), |m| m.to_string())
    );
    println!(
        "{} {}",
        "content hash:".bold(),
        attrs.content_hash.as_deref().unwrap_or("-")
    );
    let derived = [
        ("histogram (correlation):", attrs.histogram_correlation.is_some()),
        ("histogram (chi_square):", attrs.histogram_chi_square.is_some()),
        ("histogram (intersection):", attrs.histogram_intersection.is_some()),
        ("histogram (distance):", attrs.histogram_distance.is_some()),
        ("embedding:", attrs.embedding.is_some()),
    ];
    for (label, stored) in derived {
        println!("{} {}", label.bold(), present(stored));
    }
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    read_confirm(prompt, default, &mut io::stdin().lock(), &mut io::stdout())
}

/// Ask until the answer is yes, no, or empty with a default. End of input takes the
/// default, or no.
fn read_confirm(
    prompt: &str,
    default: Option<bool>,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> io::Result<bool> {
    let mut line = String::new();

    loop {
        line.clear();

        match default {
            Some(true) => write!(output, "{} (Y/n): ", prompt)?,
            Some(false) | None => write!(output, "{} (y/N): ", prompt)?,
        }
        output.flush()?;

        if input.read_line(&mut line)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match line.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_args() -> FindArgs {
        FindArgs {
            sources: Vec::new(),
            name: false,
            date: false,
            size: false,
            hash: false,
            histogram: None,
            embedding: false,
            threshold: None,
            file_type: None,
        }
    }

    struct BrokenInput;

    impl io::Read for BrokenInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"))
        }
    }

    #[test]
    fn test_confirm_reads_answers_and_defaults() {
        let mut out = Vec::new();
        assert!(read_confirm("Go?", Some(false), &mut "y\n".as_bytes(), &mut out).unwrap());
        assert!(!read_confirm("Go?", Some(true), &mut "n\n".as_bytes(), &mut out).unwrap());
        assert!(read_confirm("Go?", Some(true), &mut "\n".as_bytes(), &mut out).unwrap());
        assert!(read_confirm("Go?", None, &mut "maybe\n\nY\n".as_bytes(), &mut out).unwrap());
        assert!(!read_confirm("Go?", None, &mut "".as_bytes(), &mut out).unwrap());
    }

    #[test]
    fn test_confirm_reports_input_errors() {
        let mut input = io::BufReader::new(BrokenInput);
        let mut out = Vec::new();
        let err = read_confirm("Go?", Some(false), &mut input, &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_flags_override_configured_comparison() {
        let mut config = AppConfig::default();
        config.comparison = ComparisonOptions::new().enable(COMPARE_NAME);
        let args = FindArgs {
            size: true,
            embedding: true,
            threshold: Some(0.8),
            ..find_args()
        };

        let options = comparison_options(&config, &args);
        assert!(options.is_enabled(COMPARE_SIZE));
        assert!(options.is_enabled(COMPARE_EMBEDDING));
        assert!(!options.is_enabled(COMPARE_NAME));
        assert_eq!(options.strategies[COMPARE_EMBEDDING].threshold, Some(0.8));
        assert_eq!(options.strategies[COMPARE_SIZE].threshold, None);
    }

    #[test]
    fn test_configured_comparison_is_the_fallback() {
        let mut config = AppConfig::default();
        config.comparison = ComparisonOptions::new().enable(COMPARE_CONTENT_HASH);
        let options = comparison_options(&config, &find_args());
        assert_eq!(options, config.comparison);
    }

    #[test]
    fn test_file_type_resolves_extensions() {
        let config = AppConfig::default();
        let args = FindArgs {
            hash: true,
            file_type: Some(sift_duper_core::FileTypeFilter::Image),
            ..find_args()
        };
        let options = comparison_options(&config, &args);
        let extensions = options.extensions.unwrap();
        assert!(extensions.contains(&"png".to_string()));
        assert!(!extensions.contains(&"mp3".to_string()));
    }
}
