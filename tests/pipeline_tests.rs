// Integration tests for DocFlow pipelines
use docflow::{
    Document, DocumentSink, DocFlowError, MemoryCursor, MemorySink, Pipeline, PipelineContext,
    Stage, StageKind,
};
use docflow::aggregation::source::{ArraySource, CursorSource};
use parking_lot::RwLock;
use serde_json::{json, Value as Json};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Helper: wrap JSON objects as an array source stage
fn array_source(ctx: &Arc<PipelineContext>, docs: &[Json]) -> Stage {
    let docs = docs
        .iter()
        .map(|j| Arc::new(Document::from_json(j).unwrap()))
        .collect();
    Stage::new(
        StageKind::Array(ArraySource::from_documents(docs)),
        Arc::clone(ctx),
    )
}

// Helper: parse, optimize and run a pipeline over in-memory documents
fn run(spec: Json, docs: &[Json]) -> Vec<Json> {
    let ctx = PipelineContext::new();
    let mut pipeline = Pipeline::from_json(&spec, Arc::clone(&ctx)).unwrap();
    pipeline.optimize();
    let out = pipeline.run(array_source(&ctx, docs)).unwrap();
    out.iter().map(|d| d.to_json()).collect()
}

// Helper: same, but without the optimizer pass
fn run_unoptimized(spec: Json, docs: &[Json]) -> Vec<Json> {
    let ctx = PipelineContext::new();
    let mut pipeline = Pipeline::from_json(&spec, Arc::clone(&ctx)).unwrap();
    let out = pipeline.run(array_source(&ctx, docs)).unwrap();
    out.iter().map(|d| d.to_json()).collect()
}

fn as_set(mut docs: Vec<Json>) -> Vec<Json> {
    docs.sort_by_key(|d| d.to_string());
    docs
}

// ========== end-to-end scenarios ==========

#[test]
fn test_match_then_project() {
    let out = run(
        json!([{"match": {"a": {"$gt": 1}}}, {"project": {"a": 1, "_id": 0}}]),
        &[json!({"a": 0}), json!({"a": 1}), json!({"a": 2}), json!({"a": 3})],
    );
    assert_eq!(out, vec![json!({"a": 2}), json!({"a": 3})]);
}

#[test]
fn test_group_sum() {
    let out = run(
        json!([{"group": {"_id": "$k", "s": {"sum": "$v"}}}]),
        &[
            json!({"k": "x", "v": 1}),
            json!({"k": "x", "v": 2}),
            json!({"k": "y", "v": 5}),
        ],
    );
    assert_eq!(
        as_set(out),
        as_set(vec![json!({"_id": "x", "s": 3}), json!({"_id": "y", "s": 5})])
    );
}

#[test]
fn test_unwind() {
    let out = run(
        json!([{"unwind": "$t"}]),
        &[
            json!({"id": 1, "t": [10, 20]}),
            json!({"id": 2, "t": []}),
            json!({"id": 3, "t": [30]}),
        ],
    );
    assert_eq!(
        out,
        vec![
            json!({"id": 1, "t": 10}),
            json!({"id": 1, "t": 20}),
            json!({"id": 3, "t": 30}),
        ]
    );
}

#[test]
fn test_sort_then_limit() {
    let out = run(
        json!([{"sort": {"n": 1}}, {"limit": 2}]),
        &[json!({"n": 3}), json!({"n": 1}), json!({"n": 2}), json!({"n": 4})],
    );
    assert_eq!(out, vec![json!({"n": 1}), json!({"n": 2})]);
}

#[test]
fn test_dependency_pushdown_into_cursor() {
    let ctx = PipelineContext::new();
    let mut pipeline = Pipeline::from_json(
        &json!([
            {"project": {"a": 1, "_id": 0}},
            {"match": {"a": {"$gt": 0}}}
        ]),
        Arc::clone(&ctx),
    )
    .unwrap();

    let lock = Arc::new(RwLock::new(()));
    let cursor = MemoryCursor::new(vec![
        Document::from_json(&json!({"_id": 1, "a": 1, "big": "payload"})).unwrap(),
        Document::from_json(&json!({"_id": 2, "a": 0, "big": "payload"})).unwrap(),
    ]);
    let source = Stage::new(
        StageKind::Cursor(CursorSource::new(Box::new(cursor), &lock)),
        Arc::clone(&ctx),
    );

    let out = pipeline.run(source).unwrap();
    let out: Vec<Json> = out.iter().map(|d| d.to_json()).collect();
    assert_eq!(out, vec![json!({"a": 1})]);

    // The cursor stage carries the synthesized projection in its explain view
    let explain = pipeline.serialize(true);
    let cursor_view = &explain["pipeline"][0]["$cursor"];
    assert_eq!(cursor_view["projection"], json!({"a": 1, "_id": 0}));
}

// ========== invariants ==========

#[test]
fn test_optimize_preserves_output() {
    let spec = json!([
        {"match": {"a": {"$gte": 1}}},
        {"sort": {"a": 1}},
        {"match": {"b": {"$lt": 10}}},
        {"limit": 5},
        {"limit": 3}
    ]);
    let docs: Vec<Json> = (0..8)
        .map(|n| json!({"a": n % 4, "b": n, "_id": n}))
        .collect();
    assert_eq!(run(spec.clone(), &docs), run_unoptimized(spec, &docs));
}

#[test]
fn test_coalesce_preserves_output() {
    let spec = json!([
        {"match": {"a": {"$gt": 0}}},
        {"match": {"a": {"$lt": 6}}},
        {"skip": 1},
        {"skip": 1}
    ]);
    let docs: Vec<Json> = (0..8).map(|n| json!({"a": n})).collect();
    let optimized = run(spec.clone(), &docs);
    assert_eq!(
        optimized,
        vec![json!({"a": 3}), json!({"a": 4}), json!({"a": 5})]
    );
    assert_eq!(optimized, run_unoptimized(spec, &docs));
}

#[test]
fn test_limit_bound() {
    let docs: Vec<Json> = (0..10).map(|n| json!({"n": n})).collect();
    for limit in [1u64, 3, 10, 50] {
        let out = run(
            json!([{"match": {"n": {"$gte": 2}}}, {"limit": limit}]),
            &docs,
        );
        assert_eq!(out.len(), std::cmp::min(8, limit as usize));
    }
}

#[test]
fn test_skip_limit_is_a_contiguous_slice() {
    let docs: Vec<Json> = (0..10).map(|n| json!({"n": n})).collect();
    let whole = run(json!([{"sort": {"n": 1}}]), &docs);
    let sliced = run(json!([{"sort": {"n": 1}}, {"skip": 3}, {"limit": 4}]), &docs);
    assert_eq!(sliced, whole[3..7].to_vec());

    // Skip past the end yields nothing
    let empty = run(json!([{"skip": 50}, {"limit": 2}]), &docs);
    assert!(empty.is_empty());
}

#[test]
fn test_group_keys_use_value_equality() {
    // 1 (int) and 1.0 (double) are the same key; "1" is not
    let out = run(
        json!([{"group": {"_id": "$k", "count": {"sum": 1}}}]),
        &[json!({"k": 1}), json!({"k": 1.0}), json!({"k": "1"})],
    );
    assert_eq!(out.len(), 2);
}

#[test]
fn test_sort_is_stable_on_equal_keys() {
    let out = run(
        json!([{"sort": {"k": 1}}]),
        &[
            json!({"k": 2, "tag": "a"}),
            json!({"k": 1, "tag": "b"}),
            json!({"k": 1, "tag": "c"}),
            json!({"k": 2, "tag": "d"}),
        ],
    );
    let tags: Vec<&str> = out.iter().map(|d| d["tag"].as_str().unwrap()).collect();
    assert_eq!(tags, vec!["b", "c", "a", "d"]);
}

// ========== richer pipelines ==========

#[test]
fn test_unwind_group_roundup() {
    let out = run(
        json!([
            {"unwind": "$tags"},
            {"group": {"_id": "$tags", "count": {"sum": 1}}},
            {"sort": {"count": -1, "_id": 1}}
        ]),
        &[
            json!({"tags": ["red", "blue"]}),
            json!({"tags": ["blue"]}),
            json!({"tags": []}),
            json!({"other": 1}),
        ],
    );
    assert_eq!(
        out,
        vec![
            json!({"_id": "blue", "count": 2}),
            json!({"_id": "red", "count": 1}),
        ]
    );
}

#[test]
fn test_group_accumulator_battery() {
    let out = run(
        json!([
            {"group": {
                "_id": null,
                "total": {"sum": "$v"},
                "mean": {"avg": "$v"},
                "lo": {"min": "$v"},
                "hi": {"max": "$v"},
                "head": {"first": "$v"},
                "tail": {"last": "$v"},
                "all": {"push": "$v"}
            }}
        ]),
        &[json!({"v": 4}), json!({"v": 1}), json!({"v": 7})],
    );
    assert_eq!(
        out,
        vec![json!({
            "_id": null,
            "total": 12,
            "mean": 4.0,
            "lo": 1,
            "hi": 7,
            "head": 4,
            "tail": 7,
            "all": [4, 1, 7]
        })]
    );
}

#[test]
fn test_group_add_to_set_dedups() {
    let out = run(
        json!([{"group": {"_id": null, "kinds": {"addToSet": "$k"}}}]),
        &[json!({"k": "a"}), json!({"k": "b"}), json!({"k": "a"})],
    );
    let mut kinds: Vec<String> = out[0]["kinds"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    kinds.sort();
    assert_eq!(kinds, vec!["a", "b"]);
}

#[test]
fn test_project_computed_fields() {
    let out = run(
        json!([
            {"project": {
                "_id": 0,
                "name": "$user.name",
                "total": {"$add": ["$price", "$tax"]},
                "flag": {"$gt": ["$price", 100]}
            }}
        ]),
        &[json!({"user": {"name": "amy"}, "price": 120, "tax": 12})],
    );
    assert_eq!(
        out,
        vec![json!({"name": "amy", "total": 132, "flag": true})]
    );
}

#[test]
fn test_filter_stage_truthiness() {
    let out = run(
        json!([{"filter": {"$gt": ["$n", 1]}}]),
        &[json!({"n": 1}), json!({"n": 2})],
    );
    assert_eq!(out, vec![json!({"n": 2})]);
}

#[test]
fn test_nested_paths_everywhere() {
    let out = run(
        json!([
            {"match": {"order.total": {"$gte": 100}}},
            {"sort": {"order.total": -1}},
            {"project": {"total": "$order.total", "_id": 0}}
        ]),
        &[
            json!({"order": {"total": 250}}),
            json!({"order": {"total": 50}}),
            json!({"order": {"total": 100}}),
        ],
    );
    assert_eq!(out, vec![json!({"total": 250}), json!({"total": 100})]);
}

// ========== error paths ==========

#[test]
fn test_unwind_type_error_terminates() {
    let ctx = PipelineContext::new();
    let mut pipeline =
        Pipeline::from_json(&json!([{"unwind": "$t"}]), Arc::clone(&ctx)).unwrap();
    let err = pipeline
        .run(array_source(&ctx, &[json!({"t": 5})]))
        .unwrap_err();
    assert!(matches!(err, DocFlowError::TypeMismatch(_)));
}

#[test]
fn test_arithmetic_type_error_surfaces_from_project() {
    let ctx = PipelineContext::new();
    let mut pipeline = Pipeline::from_json(
        &json!([{"project": {"x": {"$add": ["$s", 1]}}}]),
        Arc::clone(&ctx),
    )
    .unwrap();
    let err = pipeline
        .run(array_source(&ctx, &[json!({"s": "text"})]))
        .unwrap_err();
    assert!(matches!(err, DocFlowError::TypeMismatch(_)));
}

#[test]
fn test_cursor_invalidation_mid_pipeline() {
    let ctx = PipelineContext::new();
    let mut pipeline =
        Pipeline::from_json(&json!([{"match": {}}]), Arc::clone(&ctx)).unwrap();

    let flag = Arc::new(AtomicBool::new(false));
    let docs = vec![
        Document::from_json(&json!({"n": 1})).unwrap(),
        Document::from_json(&json!({"n": 2})).unwrap(),
    ];
    // Invalidated before the first pull: the run fails outright
    flag.store(true, Ordering::Relaxed);
    let lock = Arc::new(RwLock::new(()));
    let cursor = MemoryCursor::new(docs).with_invalidation_flag(Arc::clone(&flag));
    let source = Stage::new(
        StageKind::Cursor(CursorSource::new(Box::new(cursor), &lock)),
        Arc::clone(&ctx),
    );
    let err = pipeline.run(source).unwrap_err();
    assert_eq!(err, DocFlowError::CursorInvalidated);

    // Disposal released the read lock even though the run failed
    assert!(lock.try_write().is_some());
}

#[test]
fn test_cancelled_pipeline_reports_and_disposes() {
    let ctx = PipelineContext::new();
    let mut pipeline =
        Pipeline::from_json(&json!([{"limit": 5}]), Arc::clone(&ctx)).unwrap();
    ctx.interrupt();
    let err = pipeline
        .run(array_source(&ctx, &[json!({"n": 1})]))
        .unwrap_err();
    assert_eq!(err, DocFlowError::Cancelled);
}

// ========== $out ==========

#[test]
fn test_out_writes_while_passing_through() {
    let ctx = PipelineContext::new();
    let mut pipeline = Pipeline::from_json(
        &json!([{"match": {"keep": true}}, {"out": "filtered"}]),
        Arc::clone(&ctx),
    )
    .unwrap();
    let sink = MemorySink::new();
    let written = sink.contents();
    pipeline.bind_out_sink(Box::new(sink)).unwrap();

    let out = pipeline
        .run(array_source(
            &ctx,
            &[
                json!({"keep": true, "n": 1}),
                json!({"keep": false, "n": 2}),
                json!({"keep": true, "n": 3}),
            ],
        ))
        .unwrap();

    assert_eq!(out.len(), 2);
    let stored: Vec<Json> = written.lock().iter().map(|d| d.to_json()).collect();
    assert_eq!(
        stored,
        vec![json!({"keep": true, "n": 1}), json!({"keep": true, "n": 3})]
    );
}

// A sink that appends one JSON document per line, as an external store would
struct JsonLinesSink {
    file: std::fs::File,
}

impl DocumentSink for JsonLinesSink {
    fn write(&mut self, document: &Document) -> docflow::Result<()> {
        writeln!(self.file, "{}", document.to_json())
            .map_err(|e| DocFlowError::InvalidPipeline(e.to_string()))
    }
}

#[test]
fn test_out_to_file_sink() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("out.jsonl");

    let ctx = PipelineContext::new();
    let mut pipeline = Pipeline::from_json(
        &json!([{"sort": {"n": 1}}, {"out": "archive"}]),
        Arc::clone(&ctx),
    )
    .unwrap();
    pipeline
        .bind_out_sink(Box::new(JsonLinesSink {
            file: std::fs::File::create(&path).unwrap(),
        }))
        .unwrap();
    pipeline
        .run(array_source(&ctx, &[json!({"n": 2}), json!({"n": 1})]))
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines, vec![r#"{"n":1}"#, r#"{"n":2}"#]);
}

// ========== explain ==========

#[test]
fn test_explain_shape() {
    let ctx = PipelineContext::new();
    let mut pipeline = Pipeline::from_json(
        &json!([{"match": {"a": {"$gt": 0}}}, {"sort": {"a": 1}}, {"limit": 2}]),
        Arc::clone(&ctx),
    )
    .unwrap();
    pipeline
        .run(array_source(
            &ctx,
            &[json!({"a": 1}), json!({"a": 2}), json!({"a": 3}), json!({"a": 0})],
        ))
        .unwrap();

    let plain = pipeline.serialize(false);
    let stages = plain["pipeline"].as_array().unwrap();
    assert_eq!(stages.len(), 4); // $array source + 3 stages
    assert_eq!(stages[1], json!({"$match": {"a": {"$gt": 0}}}));
    assert_eq!(stages[3], json!({"$limit": 2}));

    let explain = pipeline.serialize(true);
    assert_eq!(explain["nReturned"], 2);
    assert_eq!(explain["pipeline"][1]["nOut"], 3);
    assert_eq!(explain["pipeline"][3]["nOut"], 2);
}
