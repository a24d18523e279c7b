//! Evaluation harness over the demo fixture pipeline.

mod common;

use std::sync::Arc;

use common::{build_stack, test_settings};
use safetydesk::eval::EvaluationHarness;
use safetydesk::fixtures::FixtureService;

#[tokio::test]
async fn golden_dataset_scores_pass_and_fail_rows() {
    let dir = tempfile::tempdir().unwrap();
    let fixtures = Arc::new(FixtureService::load(dir.path(), dir.path()).await.unwrap());
    let mut settings = test_settings();
    settings.demo_mode = true;
    let stack = build_stack(settings, Some(fixtures)).await;

    let dataset = dir.path().join("golden.csv");
    tokio::fs::write(
        &dataset,
        "id,question,must_contain,must_cite_title,category\n\
         g1,What PPE is required for construction work?,hard hats,Head Protection,ppe\n\
         g2,How do I report a workplace incident?,Form WS-101,Incident Reporting,reporting\n\
         g3,What PPE is required for construction work?,forklift certification,Head Protection,ppe\n",
    )
    .await
    .unwrap();

    let harness = EvaluationHarness::new(stack.orchestrator.clone());
    let report = harness.run(&dataset).await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.passed, 2);
    assert!((report.accuracy - 2.0 / 3.0).abs() < 1e-9);

    let ppe = &report.by_category["ppe"];
    assert_eq!(ppe.total, 2);
    assert_eq!(ppe.passed, 1);

    let failing = report.rows.iter().find(|row| row.id == "g3").unwrap();
    assert!(!failing.passed);
    assert!(!failing.answer_contains);
    assert!(failing.citation_matches);
}
