//! Console output for parsed and published runs.

use crate::model::{Outcome, Run};
use crate::orchestrator::RunSummary;

/// Prints the result list of a parsed run.
///
/// Only failed results are listed unless `verbose` is set.
pub fn print_run(run: &Run, verbose: bool) {
    println!("{}", console::style(&run.name).bold());
    if let (Some(started), Some(completed)) = (run.started, run.completed) {
        println!("  {} .. {}", started.to_rfc3339(), completed.to_rfc3339());
    }

    for result in &run.results {
        let status = match result.node.outcome {
            Outcome::Passed => console::style("PASS").green(),
            Outcome::Failed => console::style("FAIL").red(),
            Outcome::Inconclusive => console::style("INC ").yellow(),
            Outcome::NotExecuted => console::style("SKIP").yellow(),
        };
        if verbose || result.is_failed() {
            println!("  {} {}", status, result.display_name());
            if let Some(message) = &result.node.error_message {
                println!("       {}", console::style(message).dim());
            }
        }
    }

    println!();
    println!("  Results:     {}", run.results.len());
    println!("  Passed:      {}", console::style(run.count(Outcome::Passed)).green());
    println!("  Failed:      {}", console::style(run.count(Outcome::Failed)).red());
    println!("  Attachments: {}", run.attachments.len());
}

/// Prints the outcome of a publish.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("Publish Results:");
    println!("  Runs:     {}", summary.runs_published);
    println!("  Total:    {}", summary.total_results);
    println!("  Passed:   {}", console::style(summary.passed).green());
    println!("  Failed:   {}", console::style(summary.failed).red());
    if summary.other > 0 {
        println!("  Other:    {}", console::style(summary.other).yellow());
    }
    println!(
        "  Attachments: {} uploaded, {} skipped, {} failed",
        summary.attachments_uploaded, summary.attachments_skipped, summary.attachments_failed
    );
    if summary.warnings > 0 {
        println!("  Warnings: {}", console::style(summary.warnings).yellow());
    }
    for url in &summary.web_access_urls {
        println!("  {}", console::style(url).dim());
    }

    println!();
    if !summary.had_failed_results {
        println!("{}", console::style("All published tests passed.").green().bold());
    } else if summary.fail_on_failed_tests {
        println!(
            "{}",
            console::style("There are one or more test failures.").red().bold()
        );
    } else {
        println!("{}", console::style("Some published tests failed.").yellow());
    }
}
