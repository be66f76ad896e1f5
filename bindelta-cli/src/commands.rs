//! Command implementations for the bindelta CLI.

use std::path::Path;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use bindelta_core::binexport::read_binary_from_file;
use bindelta_core::config::MatchingConfig;
use bindelta_core::matching::{diff as run_diff, MatchCatalog};
use bindelta_core::Binary;

fn load(path: &Path) -> anyhow::Result<Binary> {
    read_binary_from_file(path).with_context(|| format!("failed to load {}", path.display()))
}

fn print_match_table(catalog: &MatchCatalog, basic_blocks: bool) {
    println!(
        "{:>10}  {:>10}  {:>10}  {:>10}  {}",
        "primary", "secondary", "similarity", "confidence", "algorithm"
    );
    for function_match in &catalog.matches {
        println!(
            "{:>10}  {:>10}  {:>10.3}  {:>10.3}  {}",
            format!("{:08X}", function_match.primary_address),
            format!("{:08X}", function_match.secondary_address),
            function_match.similarity,
            function_match.confidence,
            function_match.step_name
        );
        if basic_blocks {
            for block_match in &function_match.basic_block_matches {
                println!(
                    "    {:08X} -> {:08X}  {}",
                    block_match.primary_address,
                    block_match.secondary_address,
                    block_match.step_name
                );
            }
        }
    }
    if !catalog.unmatched_primary.is_empty() {
        println!("\nunmatched primary functions:");
        for address in &catalog.unmatched_primary {
            println!("  {address:08X}");
        }
    }
    if !catalog.unmatched_secondary.is_empty() {
        println!("\nunmatched secondary functions:");
        for address in &catalog.unmatched_secondary {
            println!("  {address:08X}");
        }
    }

    let stats = &catalog.statistics;
    println!(
        "\nmatched {}/{} primary functions, {}/{} secondary; \
         {} basic blocks, {} instructions, {} edges",
        stats.matched_functions,
        stats.primary_functions,
        stats.matched_functions,
        stats.secondary_functions,
        stats.matched_basic_blocks,
        stats.matched_instructions,
        stats.matched_edges
    );
    println!(
        "similarity {:.3}, confidence {:.3}",
        stats.similarity, stats.confidence
    );
    if catalog.cancelled {
        println!("note: the run was cancelled; results are partial");
    }
}

pub fn diff(
    primary_path: &Path,
    secondary_path: &Path,
    config_path: Option<&Path>,
    output_path: Option<&Path>,
    basic_blocks: bool,
) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => MatchingConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => MatchingConfig::default(),
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("valid progress template"),
    );
    spinner.set_message(format!("loading {}", primary_path.display()));
    let primary = load(primary_path)?;
    spinner.set_message(format!("loading {}", secondary_path.display()));
    let secondary = load(secondary_path)?;
    spinner.set_message("matching...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let catalog = run_diff(&primary, &secondary, &config, None)?;
    spinner.finish_and_clear();

    print_match_table(&catalog, basic_blocks);

    if let Some(path) = output_path {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &catalog)
            .context("failed to serialize the match catalog")?;
        log::info!("wrote match catalog to {}", path.display());
    }
    Ok(())
}

pub fn dump(input: &Path) -> anyhow::Result<()> {
    let binary = load(input)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    binary
        .render(&mut out)
        .context("failed to render the binary")?;
    Ok(())
}
