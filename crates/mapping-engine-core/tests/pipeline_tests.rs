//! End-to-end pipeline tests, one per spec.md §8 scenario, exercised only
//! through the crate's public API (never reaching into module internals).

use mapping_engine_core::{
    analyze_payload, auto_mapping, canonical_item_paths, execute, flatten_target_schema, refine,
    refine_cancellable, repair, validate, NoOracle, Oracle, RefinementOptions,
};
use serde_json::json;
use std::cell::RefCell;

// ── Scenario 1: straight mapping ────────────────────────────────────────────

#[test]
fn scenario_1_straight_mapping_dotted_under_items() {
    let payload = json!({"items": [{"id": "1", "name": "A"}, {"id": "2", "name": "B"}]});
    let spec = json!({
        "mappings": {"items": {"path": "$.items[]", "map": {
            "items.id": {"source": "$.id"},
            "items.name": {"source": "$.name"},
        }}}
    });

    assert!(validate(&spec).is_empty());
    let result = execute(&spec, &[], &payload).unwrap();
    assert_eq!(
        result,
        json!({"items": [
            {"items": {"id": "1", "name": "A"}},
            {"items": {"id": "2", "name": "B"}},
        ]})
    );
}

// ── Scenario 2: auto-mapper + tail match ────────────────────────────────────

#[test]
fn scenario_2_auto_mapper_picks_records_path_and_tail_match() {
    let payload = json!({"records": [{"productId": 7, "title": "T"}]});
    let target_schema = json!({"items": [{"id": "string", "name": "string"}]});

    let spec = auto_mapping(&payload, &target_schema);
    assert_eq!(spec["mappings"]["items"]["path"], json!("$.records[]"));
    assert_eq!(spec["mappings"]["items"]["map"]["id"]["source"], serde_json::Value::Null);
    assert_eq!(spec["mappings"]["items"]["map"]["name"]["source"], serde_json::Value::Null);

    let analysis = analyze_payload(&payload);
    assert_eq!(analysis.schema["$.records[].productId"], "number");
}

// ── Scenario 3: feed-level source relocation ────────────────────────────────

#[test]
fn scenario_3_feed_level_source_relocates_to_broadcast() {
    let input = json!({
        "mappings": {"items": {"path": "$.items[]", "map": {
            "country": {"source": "$.feed_metadata.country"}
        }}}
    });
    let (repaired, _) = repair(&input, None);
    let repaired = repaired.unwrap();

    assert_eq!(
        repaired["mappings"]["items"]["map"]["country"]["source"],
        serde_json::Value::Null
    );
    assert_eq!(
        repaired["broadcast"]["country"]["source"],
        json!("$.feed_metadata.country")
    );

    let payload = json!({"feed_metadata": {"country": "US"}, "items": [{}, {}]});
    let result = execute(&repaired, &[], &payload).unwrap();
    assert_eq!(result["items"][0]["country"], json!("US"));
    assert_eq!(result["items"][1]["country"], json!("US"));
}

// ── Scenario 4: constant to default ─────────────────────────────────────────

#[test]
fn scenario_4_constant_source_becomes_default() {
    let input = json!({
        "mappings": {"items": {"path": "$.items[]", "map": {
            "currency": {"source": "USD"}
        }}}
    });
    let (repaired, _) = repair(&input, None);
    let repaired = repaired.unwrap();

    assert_eq!(
        repaired["mappings"]["items"]["map"]["currency"]["source"],
        serde_json::Value::Null
    );
    assert_eq!(repaired["defaults"]["currency"], json!("USD"));

    let payload = json!({"items": [{}, {"currency": "EUR"}]});
    // `currency` has no source at all in the repaired spec, so the default
    // fills every item.
    let result = execute(&repaired, &[], &payload).unwrap();
    assert_eq!(result["items"][0]["currency"], json!("USD"));
    assert_eq!(result["items"][1]["currency"], json!("USD"));
}

// ── Scenario 5: refinement convergence ──────────────────────────────────────

struct CountingOracle {
    calls: RefCell<usize>,
    responses: RefCell<Vec<String>>,
}

impl CountingOracle {
    fn new(responses: Vec<String>) -> Self {
        CountingOracle {
            calls: RefCell::new(0),
            responses: RefCell::new(responses),
        }
    }
}

impl Oracle for CountingOracle {
    fn complete(&self, _prompt: &str) -> Option<String> {
        *self.calls.borrow_mut() += 1;
        self.responses.borrow_mut().pop()
    }
}

#[test]
fn scenario_5_refinement_converges_after_one_oracle_call() {
    let payload = json!({"items": [{"id": 1, "name": "A"}]});
    let target_schema = json!({"items": [{"id": "string", "name": "string"}]});

    // Base spec: all sources null (the caller's partner spec is unusable).
    let base = json!({
        "mappings": {"items": {"path": "$.items[]", "map": {
            "id": {"source": serde_json::Value::Null},
            "name": {"source": serde_json::Value::Null},
        }}}
    });

    let oracle_fix = json!({
        "mappings": {"items": {"path": "$.items[]", "map": {
            "id": {"source": "$.id"},
            "name": {"source": "$.name"},
        }}}
    })
    .to_string();
    let oracle = CountingOracle::new(vec![oracle_fix]);

    let flattened = flatten_target_schema(&target_schema);
    let target_paths = canonical_item_paths(&flattened);

    let result = refine(
        Some(&base),
        &payload,
        &target_schema,
        &target_paths,
        RefinementOptions { enabled: true, max_iterations: 3 },
        &oracle,
        &[],
    );

    assert_eq!(result["mappings"]["items"]["map"]["id"]["source"], json!("$.id"));
    assert_eq!(result["mappings"]["items"]["map"]["name"]["source"], json!("$.name"));
    assert_eq!(*oracle.calls.borrow(), 1, "oracle should be invoked exactly once");
}

// ── Scenario 6: refinement stop conditions ──────────────────────────────────

#[test]
fn scenario_6a_stops_when_oracle_unavailable() {
    let payload = json!({"items": [{"id": 1}]});
    let target_schema = json!({"items": [{"id": "string"}]});
    let flattened = flatten_target_schema(&target_schema);
    let target_paths = canonical_item_paths(&flattened);

    let result = refine(
        None,
        &payload,
        &target_schema,
        &target_paths,
        RefinementOptions { enabled: true, max_iterations: 5 },
        &NoOracle,
        &[],
    );
    // With no oracle, the Auto-Mapper's best guess is returned unchanged.
    assert_eq!(result["mappings"]["items"]["map"]["id"]["source"], json!("$.id"));
}

#[test]
fn scenario_6b_stops_when_oracle_returns_identical_spec() {
    let payload = json!({"items": [{"id": 1}]});
    let target_schema = json!({"items": [{"id": "string"}]});
    let flattened = flatten_target_schema(&target_schema);
    let target_paths = canonical_item_paths(&flattened);

    let base = json!({
        "mappings": {"items": {"path": "$.items[]", "map": {
            "id": {"source": serde_json::Value::Null}
        }}}
    });
    let identical = base.to_string();
    let oracle = CountingOracle::new(vec![identical]);

    let result = refine(
        Some(&base),
        &payload,
        &target_schema,
        &target_paths,
        RefinementOptions { enabled: true, max_iterations: 5 },
        &oracle,
        &[],
    );
    assert_eq!(result["mappings"]["items"]["map"]["id"]["source"], serde_json::Value::Null);
    assert_eq!(*oracle.calls.borrow(), 1, "loop must stop right after the no-op oracle response");
}

#[test]
fn scenario_6c_exactly_one_oracle_call_when_max_iterations_is_one() {
    let payload = json!({"items": [{"id": 1}]});
    let target_schema = json!({"items": [{"id": "string"}]});
    let flattened = flatten_target_schema(&target_schema);
    let target_paths = canonical_item_paths(&flattened);

    let base = json!({
        "mappings": {"items": {"path": "$.items[]", "map": {
            "id": {"source": serde_json::Value::Null}
        }}}
    });
    // Oracle keeps returning a *different* spec each time (a changing
    // `version` tag) whose `id` source is still unresolved — so the loop
    // would keep consulting the oracle on every iteration if it weren't
    // bounded by `max_iterations`.
    let still_broken = json!({
        "version": "2.0",
        "mappings": {"items": {"path": "$.items[]", "map": {
            "id": {"source": serde_json::Value::Null}
        }}}
    })
    .to_string();
    let oracle = CountingOracle::new(vec![still_broken]);

    let result = refine(
        Some(&base),
        &payload,
        &target_schema,
        &target_paths,
        RefinementOptions { enabled: true, max_iterations: 1 },
        &oracle,
        &[],
    );
    assert_eq!(result["mappings"]["items"]["map"]["id"]["source"], serde_json::Value::Null);
    assert_eq!(result["version"], json!("2.0"), "the oracle's improved spec was adopted before the bound cut the loop");
    assert_eq!(*oracle.calls.borrow(), 1);
}

#[test]
fn scenario_6d_cancellation_stops_the_loop_without_consulting_oracle_again() {
    let payload = json!({"items": [{"id": 1}]});
    let target_schema = json!({"items": [{"id": "string"}]});
    let flattened = flatten_target_schema(&target_schema);
    let target_paths = canonical_item_paths(&flattened);

    let base = json!({
        "mappings": {"items": {"path": "$.items[]", "map": {
            "id": {"source": serde_json::Value::Null}
        }}}
    });
    let oracle = CountingOracle::new(vec!["unused".to_string()]);

    let result = refine_cancellable(
        Some(&base),
        &payload,
        &target_schema,
        &target_paths,
        RefinementOptions { enabled: true, max_iterations: 5 },
        &oracle,
        &[],
        &|| true,
    );
    assert_eq!(result["mappings"]["items"]["map"]["id"]["source"], serde_json::Value::Null);
    assert_eq!(*oracle.calls.borrow(), 0, "cancellation must pre-empt every oracle call");
}
