//! Pipeline-level scenarios: document extraction feeding fusion, with and
//! without a network-confirmed set.

use pingrab::extract::{
    embedded::EmbeddedDataParser, heuristic::HeuristicExtractor, run_chain, DocumentExtractor,
    ExtractionContext,
};
use pingrab::fuse::{fuse, EvidenceBundle};
use pingrab::models::{BoardInfo, ImageSize, Pin};
use pingrab::cdn;

use serde_json::json;

fn hash(n: u32) -> String {
    format!("{:032x}", 0xfeed0000u64 as u128 + n as u128)
}

fn record(id: &str, hash: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": format!("pin {id}"),
        "images": {
            "236x": {"url": format!("https://i.pinimg.com/236x/ab/cd/{hash}.jpg")}
        }
    })
}

fn board_markup(records: &[serde_json::Value]) -> String {
    let blob = json!({"props": {"board_feed": records}});
    format!(
        "<html><head></head><body><script id=\"__PWS_DATA__\" type=\"application/json\">{}</script></body></html>",
        blob
    )
}

fn network_pin(id: &str, hash: &str) -> Pin {
    let url = format!("https://i.pinimg.com/236x/ab/cd/{hash}.jpg");
    Pin::new(id.to_string(), cdn::variants_for(&url))
}

fn chain() -> Vec<Box<dyn DocumentExtractor>> {
    vec![
        Box::new(EmbeddedDataParser),
        Box::new(HeuristicExtractor::default()),
    ]
}

#[test]
fn embedded_blob_to_relaxed_fusion() {
    // Three well-formed records plus one with no thumbnail; the malformed
    // one is skipped without failing the others.
    let markup = board_markup(&[
        record("1000000000001", &hash(1)),
        record("1000000000002", &hash(2)),
        record("1000000000003", &hash(3)),
        json!({"id": "1000000000004", "images": {}}),
    ]);

    let mut ctx = ExtractionContext::new();
    let document = run_chain(&chain(), &markup, &mut ctx, 10);
    assert_eq!(document.len(), 3);
    for pin in &document {
        assert_eq!(pin.images.len(), 4, "all size variants populated");
        assert!(pin.images[&ImageSize::Original].contains("/originals/"));
    }

    // No browser session ran: fusion must relax and accept the document set.
    let bundle = EvidenceBundle {
        document,
        strategies: ctx.contributed.clone(),
        ..Default::default()
    };
    let outcome = fuse(
        bundle,
        BoardInfo::new("b".into(), "Board".into(), "url".into()),
        0,
    );

    assert_eq!(outcome.pins.len(), 3);
    assert_eq!(outcome.provenance, "embedded");
}

#[test]
fn heuristic_fallback_when_blob_missing() {
    // No blob at all; the chain falls through to the regex extractor.
    let markup = format!(
        "<html><body><img src=\"https://i.pinimg.com/236x/ab/cd/{}.jpg\"></body></html>",
        hash(7)
    );

    let mut ctx = ExtractionContext::new();
    let document = run_chain(&chain(), &markup, &mut ctx, 10);
    assert_eq!(document.len(), 1);
    assert_eq!(ctx.contributed, vec!["heuristic"]);
}

#[test]
fn network_set_gates_document_candidates() {
    let markup = board_markup(&[
        record("1000000000001", &hash(1)),
        record("1000000000002", &hash(2)),
    ]);

    let mut ctx = ExtractionContext::new();
    let document = run_chain(&chain(), &markup, &mut ctx, 10);

    // The browser only confirmed the first pin.
    let bundle = EvidenceBundle {
        network: vec![network_pin("1000000000001", &hash(1))],
        document,
        strategies: ctx.contributed.clone(),
        ..Default::default()
    };
    let outcome = fuse(
        bundle,
        BoardInfo::new("b".into(), "Board".into(), "url".into()),
        0,
    );

    assert_eq!(outcome.pins.len(), 1);
    assert_eq!(outcome.pins[0].id, "1000000000001");
    // Every survivor is present in the network-confirmed set.
    assert_eq!(
        outcome.pins[0].identity_hash().as_deref(),
        Some(hash(1).as_str())
    );
}

#[test]
fn dom_urls_validated_against_network_traffic() {
    let confirmed = hash(1);
    let stray = hash(9);

    let bundle = EvidenceBundle {
        network: vec![network_pin("1000000000001", &confirmed)],
        dom_urls: vec![
            format!("https://i.pinimg.com/736x/ab/cd/{confirmed}.jpg"),
            format!("https://i.pinimg.com/736x/ab/cd/{stray}.jpg"),
        ],
        ..Default::default()
    };
    let outcome = fuse(
        bundle,
        BoardInfo::new("b".into(), "Board".into(), "url".into()),
        0,
    );

    // The confirmed DOM url dedups against the network pin; the stray one
    // is rejected outright.
    assert_eq!(outcome.pins.len(), 1);
}

#[test]
fn completion_estimate_never_gates_results() {
    // Board claims 1000 pins; we found 2. The outcome reports both numbers
    // and still succeeds.
    let mut board = BoardInfo::new("b".into(), "Board".into(), "url".into());
    board.pin_count = Some(1000);

    let bundle = EvidenceBundle {
        network: vec![
            network_pin("1000000000001", &hash(1)),
            network_pin("1000000000002", &hash(2)),
        ],
        ..Default::default()
    };
    let outcome = fuse(bundle, board, 0);

    assert_eq!(outcome.pins.len(), 2);
    assert!(outcome.summary().contains("1000 reported"));
}
