//! kafka_delivery E2E Test Suite Orchestrator
//!
//! This orchestrator runs all E2E tests in the correct order:
//! 1. Producer tests (every guarantee must deliver first)
//! 2. Idempotent tests
//! 3. Transaction tests
//! 4. Retry engine tests (depend on producers for seeding and dead-lettering)
//! 5. Subscription tests (the full bus)
//!
//! ## Usage
//!
//! ```bash
//! # Run all tests
//! cargo run -p kafka_test --release
//!
//! # With a custom broker
//! KAFKA_BOOTSTRAP_SERVERS="broker:9092" cargo run -p kafka_test --release
//! ```
//!
//! ## Exit Codes
//!
//! - 0: All tests passed
//! - 1: One or more tests failed

use kafka_test::{
    // Idempotent tests
    test_idempotent_ordering_without_duplicates,
    // Producer tests
    test_guarantee_round_trip,
    test_plain_send_reports_offsets,
    // Retry tests
    test_dead_letter_after_max_redeliveries,
    test_recovery_before_budget_exhausted,
    // Subscription tests
    test_resume_after_restart,
    // Transaction tests
    test_aborted_transaction_hidden,
    test_failed_handshake_aborts,
    test_transaction_commit,
    test_transaction_headers,
    verify_broker_ready,
};

/// Test suite result tracking
struct TestSuiteResults {
    passed: usize,
    failed: usize,
    results: Vec<(&'static str, &'static str, bool)>, // (category, name, passed)
}

impl TestSuiteResults {
    fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            results: Vec::new(),
        }
    }

    fn record(&mut self, category: &'static str, name: &'static str, passed: bool) {
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.results.push((category, name, passed));
    }

    fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("TEST SUITE SUMMARY");
        println!("{}\n", "=".repeat(60));

        let mut current_category = "";
        for (category, name, passed) in &self.results {
            if *category != current_category {
                if !current_category.is_empty() {
                    println!();
                }
                println!("{}:", category);
                current_category = category;
            }
            let status = if *passed { "✅ PASSED" } else { "❌ FAILED" };
            println!("  {} - {}", name, status);
        }

        println!("\n{}", "-".repeat(60));
        println!(
            "Total: {} passed, {} failed, {} total",
            self.passed,
            self.failed,
            self.passed + self.failed
        );

        if self.failed == 0 {
            println!("\n✅ ALL TESTS PASSED");
        } else {
            println!("\n❌ SOME TESTS FAILED");
        }
    }
}

/// Run a single test and record the result
macro_rules! run_test {
    ($results:expr, $category:expr, $name:expr, $test_fn:expr) => {{
        let result = $test_fn.await;
        let passed = result.is_ok();
        if let Err(e) = &result {
            println!("❌ Test failed: {}", e);
        }
        $results.record($category, $name, passed);
        passed
    }};
}

fn section(title: &str) {
    println!("┌────────────────────────────────────────────────────────────┐");
    println!("│ {:<58} │", title);
    println!("└────────────────────────────────────────────────────────────┘\n");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║           kafka_delivery E2E Test Suite                    ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");

    if let Err(e) = verify_broker_ready().await {
        println!("❌ Broker not reachable: {}", e);
        std::process::exit(1);
    }

    let mut results = TestSuiteResults::new();

    // ==================== PRODUCER TESTS ====================
    section("PRODUCER TESTS");

    run_test!(results, "Producer", "Guarantee Round Trip", test_guarantee_round_trip());
    run_test!(results, "Producer", "Acknowledged Offsets", test_plain_send_reports_offsets());

    // ==================== IDEMPOTENT TESTS ====================
    section("IDEMPOTENT TESTS");

    run_test!(
        results,
        "Idempotent",
        "Ordering Without Duplicates",
        test_idempotent_ordering_without_duplicates()
    );

    // ==================== TRANSACTION TESTS ====================
    section("TRANSACTION TESTS");

    run_test!(results, "Transaction", "Commit", test_transaction_commit());
    run_test!(results, "Transaction", "Headers", test_transaction_headers());
    run_test!(
        results,
        "Transaction",
        "Abort Isolation",
        test_aborted_transaction_hidden()
    );
    run_test!(
        results,
        "Transaction",
        "Handshake Timeout",
        test_failed_handshake_aborts()
    );

    // ==================== RETRY TESTS ====================
    section("RETRY TESTS");

    run_test!(
        results,
        "Retry",
        "Dead Letter After Max Redeliveries",
        test_dead_letter_after_max_redeliveries()
    );
    run_test!(
        results,
        "Retry",
        "Recovery Within Budget",
        test_recovery_before_budget_exhausted()
    );

    // ==================== SUBSCRIPTION TESTS ====================
    section("SUBSCRIPTION TESTS");

    run_test!(
        results,
        "Subscription",
        "Resume After Restart",
        test_resume_after_restart()
    );

    // ==================== SUMMARY ====================
    results.print_summary();

    // Exit with appropriate code
    if results.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
