//! Citation handling in the assembled deliverable.

use crate::integration::test_utils::{scheduler, write_problem};
use solvent::provider::ScriptedClient;
use solvent::scheduler::BatchOptions;
use std::sync::Arc;
use tempfile::TempDir;

const SEARCH_WITH_SOURCES: &str = "Rayleigh scattering explains the colour [1], \
confirmed by later measurements [2].\n\n## References\n\n\
1. Strutt J. On the light from the sky. Philosophical Magazine 1871.\n\
2. Young A. Rayleigh scattering. Applied Optics 1981. https://doi.org/10.1364/AO.20.000533\n";

async fn deliverable(client: ScriptedClient) -> String {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "05_sky", "Explain why the sky is blue.");
    let report = scheduler(ws.path(), Arc::new(client))
        .run(&BatchOptions::default())
        .await
        .unwrap();
    let outcome = &report.outcomes[0];
    assert!(outcome.succeeded(), "{:?}", outcome.error);
    std::fs::read_to_string(outcome.deliverable.as_ref().unwrap()).unwrap()
}

#[tokio::test]
async fn test_cited_search_adds_reference_section() {
    let client = ScriptedClient::new()
        .reply("search", SEARCH_WITH_SOURCES)
        .reply("final_review", "Complete; no remaining gaps.")
        .reply(
            "assemble",
            "Short wavelengths scatter more [1][2], an effect Rayleigh described [5].",
        )
        .with_offline_rules();
    let text = deliverable(client).await;

    assert!(text.starts_with("Short wavelengths scatter more [1][2], an effect Rayleigh described ."));
    assert!(text.contains("## Final Review\n\nComplete; no remaining gaps.\n"));
    assert!(text.contains("## References\n\n[1] Strutt J."));
    assert!(text.contains("[2] Young A."));
    assert!(!text.contains("[3]"));
}

#[tokio::test]
async fn test_uncited_search_produces_no_reference_section() {
    let client = ScriptedClient::new()
        .reply("search", "Background only, no specific sources.")
        .reply(
            "assemble",
            "Short wavelengths scatter more [1].\n\n## References\n1. Made up 2024.\n",
        )
        .with_offline_rules();
    let text = deliverable(client).await;

    assert!(!text.contains("## References"));
    assert!(!text.contains("Made up"));
    assert!(!text.contains("[1]"));
    assert!(text.contains("## Final Review"));
}
