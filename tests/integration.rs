use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn lcr_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("lcr");
    path
}

/// Corpus layout:
/// - a1/a2: identical normalized body, a2 more complete  -> EXACT_CONTENT
/// - b1/b2: identical body, b2 has notes                 -> EXACT_CONTENT
/// - g1/g2: same title, grades 3 vs 4, cosine 0.96       -> GRADE_ADAPTATIONS
/// - c1/c2/c3: chained cosines 0.92 / 0.91 / 0.67        -> one transitive group
/// - w1/w2: identical body, w2 in an external workflow   -> EXACT_CONTENT, deferred
/// - u1: unrelated singleton
fn item_fixtures() -> Vec<(&'static str, String)> {
    let mut items = Vec::new();

    items.push((
        "a1.json",
        serde_json::json!({
            "id": "a1",
            "title": "Compost Basics",
            "body": "Layer GREENS and browns.  Turn the pile weekly.",
            "updated_at": "2023-05-10"
        })
        .to_string(),
    ));
    items.push((
        "a2.json",
        serde_json::json!({
            "id": "a2",
            "title": "Compost Basics",
            "body": "layer greens and browns. turn the pile weekly.",
            "grade_levels": ["3", "4"],
            "themes": ["soil", "decomposition"],
            "skills": ["observation"],
            "notes": "reviewed spring cohort",
            "updated_at": "2024-03-01"
        })
        .to_string(),
    ));

    items.push((
        "b1.json",
        serde_json::json!({
            "id": "b1",
            "title": "Bean Teepee Build",
            "body": "Lash six poles, plant pole beans at each base.",
            "updated_at": "2024-03-01"
        })
        .to_string(),
    ));
    items.push((
        "b2.json",
        serde_json::json!({
            "id": "b2",
            "title": "Bean Teepee Build",
            "body": "Lash six poles, plant pole beans at each base.",
            "notes": "photos in shared drive",
            "updated_at": "2024-03-01"
        })
        .to_string(),
    ));

    // grade_levels intentionally scalar here: the importer must normalize
    // the historical scalar-or-array inconsistency.
    items.push((
        "g1.json",
        serde_json::json!({
            "id": "g1",
            "title": "Garden Salsa",
            "body": "Harvest tomatoes and peppers, chop with supervision, season mildly.",
            "grade_levels": "3",
            "updated_at": "2024-03-01",
            "embedding": [1.0, 0.0]
        })
        .to_string(),
    ));
    items.push((
        "g2.json",
        serde_json::json!({
            "id": "g2",
            "title": "Garden Salsa",
            "body": "Harvest tomatoes and peppers, students chop independently, season to taste.",
            "grade_levels": ["4"],
            "updated_at": "2024-03-01",
            "embedding": [0.96, 0.28]
        })
        .to_string(),
    ));

    items.push((
        "c1.json",
        serde_json::json!({
            "id": "c1",
            "title": "Worm Bin Care",
            "body": "Feed the red wigglers vegetable scraps and keep bedding moist.",
            "updated_at": "2024-03-01",
            "embedding": [1.0, 0.0, 0.0]
        })
        .to_string(),
    ));
    items.push((
        "c2.json",
        serde_json::json!({
            "id": "c2",
            "title": "Vermiculture Lab",
            "body": "Observe decomposers processing food waste in the classroom bin.",
            "updated_at": "2024-03-01",
            "embedding": [0.92, 0.39191836, 0.0]
        })
        .to_string(),
    ));
    items.push((
        "c3.json",
        serde_json::json!({
            "id": "c3",
            "title": "Soil Critters Study",
            "body": "Survey the invertebrates living in a garden soil sample.",
            "updated_at": "2024-03-01",
            "embedding": [0.674708, 0.738084, 0.0]
        })
        .to_string(),
    ));

    items.push((
        "w1.json",
        serde_json::json!({
            "id": "w1",
            "title": "Harvest Tally",
            "body": "Weigh and record every crate from the fall harvest.",
            "updated_at": "2024-03-01"
        })
        .to_string(),
    ));
    items.push((
        "w2.json",
        serde_json::json!({
            "id": "w2",
            "title": "Harvest Tally",
            "body": "Weigh and record every crate from the fall harvest.",
            "workflow_state": "in_translation",
            "updated_at": "2024-03-01"
        })
        .to_string(),
    ));

    items.push((
        "u1.json",
        serde_json::json!({
            "id": "u1",
            "title": "Rain Gauge Reading",
            "body": "Chart weekly rainfall against the garden watering log.",
            "updated_at": "2024-03-01"
        })
        .to_string(),
    ));

    items
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let items_dir = root.join("items");
    fs::create_dir_all(&items_dir).unwrap();
    for (name, content) in item_fixtures() {
        fs::write(items_dir.join(name), content).unwrap();
    }

    let config_content = format!(
        r#"[db]
path = "{}/data/lcr.sqlite"

[reports]
dir = "{}/reports"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("lcr.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_lcr(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = lcr_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lcr binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// init + import + analyze, returning the report JSON.
fn analyzed_env() -> (TempDir, PathBuf, serde_json::Value) {
    let (tmp, config_path) = setup_test_env();
    run_lcr(&config_path, &["init"]);

    let items_dir = tmp.path().join("items");
    let (stdout, stderr, ok) = run_lcr(&config_path, &["import", items_dir.to_str().unwrap()]);
    assert!(ok, "import failed: {} {}", stdout, stderr);

    let (stdout, stderr, ok) = run_lcr(&config_path, &["analyze", "--progress", "off"]);
    assert!(ok, "analyze failed: {} {}", stdout, stderr);

    let (json_out, stderr, ok) = run_lcr(&config_path, &["report", "--json"]);
    assert!(ok, "report failed: {}", stderr);
    let report: serde_json::Value = serde_json::from_str(&json_out).unwrap();

    (tmp, config_path, report)
}

fn group_for_member<'a>(report: &'a serde_json::Value, member: &str) -> &'a serde_json::Value {
    report["groups"]
        .as_array()
        .unwrap()
        .iter()
        .find(|g| {
            g["member_ids"]
                .as_array()
                .unwrap()
                .iter()
                .any(|m| m == member)
        })
        .unwrap_or_else(|| panic!("no group containing {}", member))
}

fn member_sets(report: &serde_json::Value) -> Vec<Vec<String>> {
    let mut sets: Vec<Vec<String>> = report["groups"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| {
            g["member_ids"]
                .as_array()
                .unwrap()
                .iter()
                .map(|m| m.as_str().unwrap().to_string())
                .collect()
        })
        .collect();
    sets.sort();
    sets
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_lcr(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, first) = run_lcr(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_lcr(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_import_normalizes_and_counts() {
    let (tmp, config_path) = setup_test_env();
    run_lcr(&config_path, &["init"]);

    let items_dir = tmp.path().join("items");
    let (stdout, stderr, success) =
        run_lcr(&config_path, &["import", items_dir.to_str().unwrap()]);
    assert!(success, "import failed: {} {}", stdout, stderr);
    assert!(stdout.contains("items imported: 12"));
    assert!(stdout.contains("with embeddings: 5"));
    assert!(stdout.contains("skipped: 0"));
}

#[test]
fn test_analyze_finds_expected_groups() {
    let (_tmp, _config, report) = analyzed_env();

    assert_eq!(report["totals"]["items"], 12);
    assert_eq!(report["totals"]["groups"], 5);
    assert_eq!(report["categories"]["EXACT_CONTENT"], 3);
    assert_eq!(report["categories"]["GRADE_ADAPTATIONS"], 1);
    assert_eq!(report["categories"]["PEDAGOGICAL_VARIATIONS"], 1);
}

#[test]
fn test_exact_content_canonical_is_most_complete() {
    let (_tmp, _config, report) = analyzed_env();

    let group = group_for_member(&report, "a1");
    assert_eq!(group["category"], "EXACT_CONTENT");
    assert_eq!(group["action"], "auto_merge");
    assert_eq!(group["confidence"], "high");
    let canonicals = group["canonical_ids"].as_array().unwrap();
    assert_eq!(canonicals.len(), 1);
    assert_eq!(canonicals[0], "a2");
}

#[test]
fn test_grade_variants_keep_all() {
    let (_tmp, _config, report) = analyzed_env();

    let group = group_for_member(&report, "g1");
    assert_eq!(group["category"], "GRADE_ADAPTATIONS");
    assert_eq!(group["action"], "keep_all");
    let canonicals: Vec<&str> = group["canonical_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(canonicals, vec!["g1", "g2"]);
}

#[test]
fn test_transitive_chain_groups_together() {
    let (_tmp, _config, report) = analyzed_env();

    let group = group_for_member(&report, "c1");
    let members: Vec<&str> = group["member_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(members, vec!["c1", "c2", "c3"]);

    // The weak c1~c3 pair was discarded; only the chain links remain.
    let pairs = group["similarity"].as_array().unwrap();
    assert_eq!(pairs.len(), 2);
}

#[test]
fn test_analyze_is_deterministic() {
    let (_tmp, config_path, first_report) = analyzed_env();

    let (stdout, _, ok) = run_lcr(&config_path, &["analyze", "--progress", "off"]);
    assert!(ok, "second analyze failed: {}", stdout);
    let (json_out, _, ok) = run_lcr(&config_path, &["report", "--json"]);
    assert!(ok);
    let second_report: serde_json::Value = serde_json::from_str(&json_out).unwrap();

    assert_eq!(member_sets(&first_report), member_sets(&second_report));
    assert_eq!(first_report["categories"], second_report["categories"]);
}

#[test]
fn test_resolve_dry_run_does_not_mutate() {
    let (_tmp, config_path, report) = analyzed_env();
    let group_id = group_for_member(&report, "a1")["group_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (stdout, _, ok) = run_lcr(&config_path, &["resolve", &group_id, "--dry-run"]);
    assert!(ok);
    assert!(stdout.contains("resolve (dry-run)"));
    assert!(stdout.contains("would archive"));
    assert!(stdout.contains("succeeded: 1"));

    // Nothing was archived: the real resolve still archives a1.
    let (stdout, _, ok) = run_lcr(&config_path, &["resolve", &group_id, "--actor", "tester"]);
    assert!(ok);
    assert!(stdout.contains("archived 1 duplicate(s)"));
}

#[test]
fn test_resolve_is_idempotent() {
    let (_tmp, config_path, report) = analyzed_env();
    let group_id = group_for_member(&report, "a1")["group_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (stdout, _, ok) = run_lcr(&config_path, &["resolve", &group_id, "--actor", "tester"]);
    assert!(ok);
    assert!(stdout.contains("succeeded: 1"));

    let (stdout, _, ok) = run_lcr(&config_path, &["resolve", &group_id, "--actor", "tester"]);
    assert!(ok, "re-resolve errored: {}", stdout);
    assert!(stdout.contains("already resolved"));
    assert!(stdout.contains("skipped: 1"));
    assert!(stdout.contains("succeeded: 0"));
}

#[test]
fn test_resolve_defers_workflow_group() {
    let (_tmp, config_path, report) = analyzed_env();
    let group_id = group_for_member(&report, "w1")["group_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (stdout, _, ok) = run_lcr(&config_path, &["resolve", &group_id, "--actor", "tester"]);
    assert!(ok);
    assert!(stdout.contains("deferred"));
    assert!(stdout.contains("in_translation"));
    assert!(stdout.contains("skipped: 1"));
}

#[test]
fn test_resolve_all_reports_explicit_counts() {
    let (_tmp, config_path, _report) = analyzed_env();

    let (stdout, _, ok) = run_lcr(&config_path, &["resolve", "all", "--actor", "tester"]);
    assert!(ok, "resolve all failed: {}", stdout);
    // a and b groups archive; grade (keep_all), chain (no sub-groups at the
    // stricter threshold), and workflow-deferred groups are skipped.
    assert!(stdout.contains("succeeded: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("skipped: 3"), "stdout: {}", stdout);
    assert!(stdout.contains("failed: 0"), "stdout: {}", stdout);
}

#[test]
fn test_resolve_undo_round_trip_restores_items() {
    let (_tmp, config_path, report) = analyzed_env();
    let group_id = group_for_member(&report, "a1")["group_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (stdout, _, ok) = run_lcr(&config_path, &["resolve", &group_id, "--actor", "tester"]);
    assert!(ok);
    assert!(stdout.contains("archived 1 duplicate(s)"));

    let (stdout, _, ok) = run_lcr(&config_path, &["undo", &group_id, "--actor", "tester"]);
    assert!(ok);
    assert!(stdout.contains("restored 1 item(s)"));
    assert!(stdout.contains("succeeded: 1"));

    // A fresh analysis sees the restored item live again, identical to the
    // original corpus.
    let (stdout, _, ok) = run_lcr(&config_path, &["analyze", "--progress", "off"]);
    assert!(ok, "post-undo analyze failed: {}", stdout);
    let (json_out, _, ok) = run_lcr(&config_path, &["report", "--json"]);
    assert!(ok);
    let fresh: serde_json::Value = serde_json::from_str(&json_out).unwrap();
    assert_eq!(member_sets(&report), member_sets(&fresh));
}

#[test]
fn test_undo_all_after_resolve_all() {
    let (_tmp, config_path, report) = analyzed_env();

    run_lcr(&config_path, &["resolve", "all", "--actor", "tester"]);

    let (stdout, _, ok) = run_lcr(&config_path, &["undo", "all", "--actor", "tester"]);
    assert!(ok, "undo all failed: {}", stdout);
    assert!(stdout.contains("succeeded: 2"), "stdout: {}", stdout);

    // No records remain to undo.
    let (stdout, _, _) = run_lcr(&config_path, &["undo", "all", "--actor", "tester"]);
    assert!(stdout.contains("succeeded: 0"), "stdout: {}", stdout);

    // Everything is live again.
    let (stdout, _, ok) = run_lcr(&config_path, &["analyze", "--progress", "off"]);
    assert!(ok, "post-undo analyze failed: {}", stdout);
    let (json_out, _, ok) = run_lcr(&config_path, &["report", "--json"]);
    assert!(ok);
    let fresh: serde_json::Value = serde_json::from_str(&json_out).unwrap();
    assert_eq!(member_sets(&report), member_sets(&fresh));
}

#[test]
fn test_undo_dry_run_previews_only() {
    let (_tmp, config_path, report) = analyzed_env();
    let group_id = group_for_member(&report, "a1")["group_id"]
        .as_str()
        .unwrap()
        .to_string();

    run_lcr(&config_path, &["resolve", &group_id, "--actor", "tester"]);

    let (stdout, _, ok) = run_lcr(&config_path, &["undo", &group_id, "--dry-run"]);
    assert!(ok);
    assert!(stdout.contains("undo (dry-run)"));
    assert!(stdout.contains("would restore 1 item(s)"));

    // The record is still there, so a real undo still works.
    let (stdout, _, ok) = run_lcr(&config_path, &["undo", &group_id, "--actor", "tester"]);
    assert!(ok);
    assert!(stdout.contains("restored 1 item(s)"));
}

#[test]
fn test_groups_command_filters_by_category() {
    let (_tmp, config_path, _report) = analyzed_env();

    let (stdout, _, ok) = run_lcr(
        &config_path,
        &["groups", "--category", "GRADE_ADAPTATIONS"],
    );
    assert!(ok);
    assert!(stdout.contains("GRADE_ADAPTATIONS"));
    assert!(!stdout.contains("EXACT_CONTENT"));

    let (stdout, _, ok) = run_lcr(&config_path, &["groups", "--category", "SEASONAL_VARIATIONS"]);
    assert!(ok);
    assert!(stdout.contains("No groups."));
}

#[test]
fn test_report_artifact_written_to_disk() {
    let (tmp, config_path, report) = analyzed_env();

    let run_id = report["run_id"].as_str().unwrap();
    let artifact = tmp.path().join("reports").join(format!("{}.json", run_id));
    assert!(artifact.exists(), "missing artifact: {}", artifact.display());

    let from_disk: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&artifact).unwrap()).unwrap();
    assert_eq!(from_disk["run_id"], report["run_id"]);
    assert_eq!(from_disk["totals"]["groups"], report["totals"]["groups"]);
}

#[test]
fn test_embed_requires_provider() {
    let (_tmp, config_path) = setup_test_env();
    run_lcr(&config_path, &["init"]);

    let (_, stderr, success) = run_lcr(&config_path, &["embed", "pending", "--dry-run"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_resolve_without_analysis_fails_cleanly() {
    let (_tmp, config_path) = setup_test_env();
    run_lcr(&config_path, &["init"]);

    let (_, stderr, success) = run_lcr(&config_path, &["resolve", "all"]);
    assert!(!success);
    assert!(stderr.contains("analyze"));
}

#[test]
fn test_resume_without_cancelled_run_fails_cleanly() {
    let (tmp, config_path) = setup_test_env();
    run_lcr(&config_path, &["init"]);
    let items_dir = tmp.path().join("items");
    run_lcr(&config_path, &["import", items_dir.to_str().unwrap()]);

    let (_, stderr, success) =
        run_lcr(&config_path, &["analyze", "--resume", "--progress", "off"]);
    assert!(!success);
    assert!(stderr.contains("No cancelled analysis run"));
}
