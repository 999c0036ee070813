use anyhow::{Context, Result};
use clap::Parser;
use cribar::{
    cli::{Cli, Mode},
    config::Config,
    engine::{SelectionEngine, SelectionOutcome},
    generate, report,
};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print the training report with the top feature importances
fn print_train_report(report: &cribar::predictor::TrainReport) {
    println!();
    println!("{}", "=".repeat(50));
    println!("MODEL PERFORMANCE");
    println!("{}", "=".repeat(50));
    println!("Algorithm: {}", report.algorithm);
    println!(
        "Training set: {} samples, test set: {} samples",
        report.train_samples, report.test_samples
    );
    println!("Failure rate: {:.2}%", report.failure_rate * 100.0);
    println!();
    println!("Train Accuracy: {:.4}", report.train.accuracy);
    println!("Test Accuracy:  {:.4}", report.test.accuracy);
    println!("Train Precision: {:.4}", report.train.precision);
    println!("Test Precision:  {:.4}", report.test.precision);
    println!("Train Recall: {:.4}", report.train.recall);
    println!("Test Recall:  {:.4}", report.test.recall);
    println!("Train F1: {:.4}", report.train.f1);
    println!("Test F1:  {:.4}", report.test.f1);
    println!("Train ROC-AUC: {:.4}", report.train.roc_auc);
    println!("Test ROC-AUC:  {:.4}", report.test.roc_auc);
    println!("{}", "=".repeat(50));

    if let Some(importance) = &report.feature_importance {
        println!();
        println!("Top 10 Feature Importances:");
        for (rank, (feature, value)) in importance.iter().take(10).enumerate() {
            println!("  {}. {}: {:.4}", rank + 1, feature, value);
        }
    }
}

/// Print the selection summary and persist the chosen test ids
fn print_selection(tests: &[cribar::prioritize::TestPriority], summary: &cribar::prioritize::SelectionSummary) -> Result<()> {
    println!();
    println!("{}", "=".repeat(50));
    println!("TEST SELECTION SUMMARY");
    println!("{}", "=".repeat(50));
    println!("Total tests: {}", summary.total_tests);
    println!("Selected tests: {}", summary.selected_tests);
    println!("Reduction: {:.1}%", summary.reduction_percentage);
    println!();
    println!("Estimated execution time:");
    println!("  All tests: {:.2}s", summary.total_execution_time_all);
    println!("  Selected:  {:.2}s", summary.total_execution_time_selected);
    println!(
        "  Time saved: {:.2}s ({:.1}%)",
        summary.time_saved, summary.time_reduction_percentage
    );
    println!(
        "Risk buckets: {} high / {} medium / {} low",
        summary.high_priority_count, summary.medium_priority_count, summary.low_priority_count
    );
    println!("{}", "=".repeat(50));
    println!();

    println!("Selected {} tests to run:", tests.len());
    for (rank, test) in tests.iter().take(20).enumerate() {
        println!("  {}. {}", rank + 1, test.test_name);
    }
    if tests.len() > 20 {
        println!("  ... and {} more tests", tests.len() - 20);
    }

    let output_file = "selected_tests.txt";
    let mut contents = String::new();
    for test in tests {
        contents.push_str(&test.test_name);
        contents.push('\n');
    }
    std::fs::write(output_file, contents)
        .with_context(|| format!("failed to write {output_file}"))?;
    println!();
    println!("Selected tests saved to: {output_file}");
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;

    match args.mode {
        Mode::GenerateHistory => {
            let history_file = args
                .history_file
                .unwrap_or_else(|| config.data.history_file.clone());
            let ledger = generate::generate_history(args.num_runs, &history_file, args.seed)?;
            println!(
                "Generated {} records across {} runs (pass rate {:.2}%)",
                ledger.len(),
                args.num_runs,
                ledger.pass_rate() * 100.0
            );
            println!("Saved to: {}", history_file.display());
        }

        Mode::Train => {
            let mut engine = SelectionEngine::new(config, ".")?;
            let report = engine
                .train(args.history_file.as_deref())
                .context("training failed")?;
            print_train_report(&report);
        }

        Mode::Select => {
            let mut engine = SelectionEngine::new(config, ".")?;
            let outcome = engine
                .select(args.changed_files, args.threshold)
                .context("selection failed")?;

            match outcome {
                SelectionOutcome::NoChanges => {
                    println!("No code changes detected; no tests selected.");
                    println!("Run the full suite if a safety net is required.");
                }
                SelectionOutcome::Selected { tests, summary } => {
                    print_selection(&tests, &summary)?;
                }
            }
        }

        Mode::Report => {
            let mut engine = SelectionEngine::new(config, ".")?;
            let priorities = engine
                .test_priorities(args.changed_files)
                .context("prioritization failed")?;
            report::write_report(&priorities, &args.output)
                .with_context(|| format!("failed to write {}", args.output.display()))?;
            println!("Report saved to: {}", args.output.display());
        }
    }

    Ok(())
}
