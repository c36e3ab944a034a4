// Colored terminal output for verdicts, batches, and provider status.
//
// main.rs delegates all human-readable rendering here; `--json` output
// bypasses this module entirely.

use colored::Colorize;

use crate::batch::{BatchSummary, ItemResult};
use crate::engine::{ModerationEngine, ModerationResult};
use crate::error::ModerationError;
use crate::taxonomy::ProviderId;

/// Display a single verdict with its per-category scores.
pub fn display_verdict(result: &ModerationResult) {
    let verdict = if result.flagged {
        "FLAGGED".red().bold()
    } else {
        "clean".green().bold()
    };

    println!("\n{} {}", "Verdict:".bold(), verdict);
    println!("  Mode: {}", result.mode_used);
    println!("  Providers: {}", join_providers(result.contributing_providers.iter()));
    if result.is_partial() {
        println!(
            "  {} {}",
            "Unavailable:".yellow(),
            join_providers(result.failed_providers.iter())
        );
    }

    println!();
    for (category, score) in result.category_scores.iter() {
        let name = format!("{:<12}", category.as_str());
        let line = format!("  {name} {score:>5.2}  {}", score_bar(score));
        if result.flagged_categories.contains(&category) {
            println!("{}", line.red());
        } else if score > 0.0 {
            println!("{line}");
        } else {
            println!("{}", line.dimmed());
        }
    }

    if let Some(raw) = &result.raw_responses {
        println!("\n  {}", "Raw responses:".dimmed());
        for (provider, payload) in raw {
            println!("    {provider}: {}", payload.to_string().dimmed());
        }
    }

    println!("\n  {}", format!("id {}", result.moderation_id).dimmed());
}

/// Display a whole-request failure.
pub fn display_failure(error: &ModerationError) {
    println!("\n{} {}", "Error:".red().bold(), error);
}

/// One line per batch item, in input order.
pub fn display_batch(lines: &[String], results: &[ItemResult]) {
    println!(
        "\n{}",
        format!("=== Batch ({} items) ===", results.len()).bold()
    );
    println!();

    for (i, (text, item)) in lines.iter().zip(results).enumerate() {
        let preview = super::truncate_chars(text, 60);
        match item {
            Ok(result) => {
                let status = if result.flagged {
                    "FLAG".red().bold()
                } else {
                    "ok  ".green()
                };
                let top = result
                    .category_scores
                    .highest()
                    .map(|(c, s)| format!("{c} {s:.2}"))
                    .unwrap_or_default();
                let partial = if result.is_partial() { " ~" } else { "" };
                println!(
                    "  {:>4}. {} {:<18}{} {}",
                    i + 1,
                    status,
                    top,
                    partial.yellow(),
                    preview.dimmed()
                );
            }
            Err(failure) => {
                println!(
                    "  {:>4}. {} {} {}",
                    i + 1,
                    "ERR ".bright_red().bold(),
                    failure.error,
                    preview.dimmed()
                );
            }
        }
    }

    let summary = BatchSummary::from_results(results);
    println!();
    if summary.flagged > 0 {
        println!("  {} {} flagged", "!!".red().bold(), summary.flagged);
    }
    println!("  {} {} clean", "-".green(), summary.clean);
    if summary.partial > 0 {
        println!("  {} {} with a provider missing", "~".yellow(), summary.partial);
    }
    if summary.failed > 0 {
        println!("  {} {} failed", "x".bright_red(), summary.failed);
    }
}

/// Show which providers the engine can use, and why the rest can't be.
pub fn display_providers(engine: &ModerationEngine) {
    println!("\n{}", "=== Providers ===".bold());
    println!();

    let configured = engine.configured_providers();
    for provider in ProviderId::ALL {
        if configured.contains(&provider) {
            let combined = if engine.combined_providers().contains(&provider) {
                " (combined)".dimmed().to_string()
            } else {
                String::new()
            };
            println!("  {:<10} {}{}", provider.as_str(), "ready".green(), combined);
        } else {
            let reason = engine
                .unavailable_reason(provider)
                .map(|e| e.to_string())
                .unwrap_or_else(|| "not configured".to_string());
            println!(
                "  {:<10} {} {}",
                provider.as_str(),
                "unavailable".yellow(),
                reason.dimmed()
            );
        }
    }
}

fn join_providers<'a>(providers: impl Iterator<Item = &'a ProviderId>) -> String {
    providers
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Ten-cell bar for a 0-1 score.
fn score_bar(score: f64) -> String {
    let filled = (score.clamp(0.0, 1.0) * 10.0).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(10 - filled))
}
