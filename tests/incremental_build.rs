//! End-to-end incremental build scenarios.
//!
//! Each test builds a fixture site, mutates one input, rebuilds, and checks
//! the rebuild set and reasons. Builds are serialized: the effect tracer is
//! injected process-wide per build, so two builds must not interleave.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use bengal::build::{BuildOptions, BuildSummary, build};
use bengal::detect::results::RebuildReasonCode;
use bengal::orchestration::render::RenderMode;

static BUILD_LOCK: Mutex<()> = Mutex::new(());

fn build_guard() -> MutexGuard<'static, ()> {
    match BUILD_LOCK.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn init_site(root: &Path) {
    write(root, "bengal.toml", "title = \"Fixture Site\"\n");
    write(
        root,
        "themes/default/templates/page.html",
        "<h1>{{ title }}</h1>\n<div>{{ content }}</div>\n",
    );
    write(root, "themes/default/templates/tag.html", "<h1>Tag: {{ title }}</h1>\n");
    write(root, "themes/default/templates/tags.html", "<h1>{{ title }}</h1>\n");
}

fn run_build(root: &Path) -> BuildSummary {
    let options = BuildOptions {
        mode: RenderMode::Sequential,
        ..Default::default()
    };
    build(root, &options).unwrap()
}

fn reason_of(summary: &BuildSummary, key: &str) -> RebuildReasonCode {
    summary
        .reasons
        .get(key)
        .unwrap_or_else(|| panic!("no reason recorded for {}", key))
        .code
}

fn rebuilt_keys(summary: &BuildSummary) -> BTreeSet<String> {
    summary
        .reasons
        .keys()
        .map(|key| key.as_str().to_string())
        .collect()
}

/// S1: editing one content file rebuilds exactly that page.
#[test]
fn test_single_content_edit() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    for i in 0..20 {
        write(
            dir.path(),
            &format!("content/page-{:02}.md", i),
            &format!("+++\ntitle = \"Page {}\"\n+++\nbody {}\n", i, i),
        );
    }
    write(dir.path(), "content/about.md", "+++\ntitle = \"About\"\n+++\noriginal\n");

    let first = run_build(dir.path());
    assert_eq!(first.pages_built, 21);

    let before: Vec<(std::path::PathBuf, std::time::SystemTime)> = walk_outputs(dir.path());

    write(dir.path(), "content/about.md", "+++\ntitle = \"About\"\n+++\nedited\n");
    let second = run_build(dir.path());

    assert_eq!(second.pages_built, 1);
    assert_eq!(
        rebuilt_keys(&second),
        BTreeSet::from(["content/about.md".to_string()])
    );
    assert_eq!(
        reason_of(&second, "content/about.md"),
        RebuildReasonCode::ContentChanged
    );

    // Every other output is untouched on disk.
    for (path, mtime) in before {
        if path.ends_with("about/index.html") {
            continue;
        }
        let current = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(current, mtime, "output rewritten: {:?}", path);
    }
}

fn walk_outputs(root: &Path) -> Vec<(std::path::PathBuf, std::time::SystemTime)> {
    walkdir::WalkDir::new(root.join("public"))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| {
            let mtime = e.metadata().unwrap().modified().unwrap();
            (e.path().to_path_buf(), mtime)
        })
        .collect()
}

/// S2: a template edit rebuilds every page using it.
#[test]
fn test_template_edit_cascades() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    for i in 0..30 {
        write(
            dir.path(),
            &format!("content/page-{:02}.md", i),
            &format!("+++\ntitle = \"Page {}\"\n+++\nbody\n", i),
        );
    }

    run_build(dir.path());

    write(
        dir.path(),
        "themes/default/templates/page.html",
        "<h1>EDITED {{ title }}</h1>\n<div>{{ content }}</div>\n",
    );
    let second = run_build(dir.path());

    assert_eq!(second.pages_built, 30);
    for i in 0..30 {
        let key = format!("content/page-{:02}.md", i);
        assert_eq!(reason_of(&second, &key), RebuildReasonCode::TemplateChanged);
    }
    // The edit actually reached the outputs.
    let html = fs::read_to_string(dir.path().join("public/page-00/index.html")).unwrap();
    assert!(html.contains("EDITED"));
}

/// S3: a tag transition rebuilds the page, both tag pages and the index.
#[test]
fn test_tag_transition() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    write(
        dir.path(),
        "content/post-1.md",
        "+++\ntitle = \"Post 1\"\ntags = [\"python\"]\n+++\nbody\n",
    );
    write(
        dir.path(),
        "content/post-2.md",
        "+++\ntitle = \"Post 2\"\ntags = [\"rust\"]\n+++\nbody\n",
    );

    run_build(dir.path());

    write(
        dir.path(),
        "content/post-1.md",
        "+++\ntitle = \"Post 1\"\ntags = [\"python\", \"async\"]\n+++\nbody\n",
    );
    let second = run_build(dir.path());

    let rebuilt = rebuilt_keys(&second);
    assert!(rebuilt.contains("content/post-1.md"));
    assert!(rebuilt.contains("_generated/tags/python.md"));
    assert!(rebuilt.contains("_generated/tags/async.md"));
    assert!(rebuilt.contains("_generated/tags/_index.md"));
    // The rust tag is unaffected.
    assert!(!rebuilt.contains("_generated/tags/rust.md"));

    assert_eq!(
        reason_of(&second, "content/post-1.md"),
        RebuildReasonCode::ContentChanged
    );
    assert_eq!(
        reason_of(&second, "_generated/tags/python.md"),
        RebuildReasonCode::TaxonomyCascade
    );
}

/// S4: a data file edit rebuilds exactly its dependents.
#[test]
fn test_data_file_change() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    write(
        dir.path(),
        "content/a.md",
        "+++\ntitle = \"A\"\ndata_files = [\"data/team.yaml\"]\n+++\nbody\n",
    );
    write(
        dir.path(),
        "content/b.md",
        "+++\ntitle = \"B\"\ndata_files = [\"data/team.yaml\"]\n+++\nbody\n",
    );
    write(dir.path(), "content/c.md", "+++\ntitle = \"C\"\n+++\nbody\n");
    write(dir.path(), "data/team.yaml", "team:\n  - jane\n");

    run_build(dir.path());

    write(dir.path(), "data/team.yaml", "team:\n  - jane\n  - bob\n");
    let second = run_build(dir.path());

    assert_eq!(
        rebuilt_keys(&second),
        BTreeSet::from(["content/a.md".to_string(), "content/b.md".to_string()])
    );
    for key in ["content/a.md", "content/b.md"] {
        let reason = second.reasons.get(key).unwrap();
        assert_eq!(reason.code, RebuildReasonCode::DataFileChanged);
        assert_eq!(reason.trigger, "data/team.yaml");
    }
}

/// S5: deleting a post rebuilds its former prev/next neighbors.
#[test]
fn test_adjacent_navigation_on_delete() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    for i in 1..=5 {
        write(
            dir.path(),
            &format!("content/blog/post-{}.md", i),
            &format!("+++\ntitle = \"Post {}\"\n+++\nbody\n", i),
        );
    }

    run_build(dir.path());

    fs::remove_file(dir.path().join("content/blog/post-2.md")).unwrap();
    let second = run_build(dir.path());

    let rebuilt = rebuilt_keys(&second);
    assert!(rebuilt.contains("content/blog/post-1.md"));
    assert!(rebuilt.contains("content/blog/post-3.md"));
    assert_eq!(
        reason_of(&second, "content/blog/post-1.md"),
        RebuildReasonCode::AdjacentNavChanged
    );
    assert_eq!(
        reason_of(&second, "content/blog/post-3.md"),
        RebuildReasonCode::AdjacentNavChanged
    );
    // Posts 4 and 5 kept their neighbors.
    assert!(!rebuilt.contains("content/blog/post-5.md"));
}

/// S6: an effective-config change forces a full rebuild with an empty
/// reason map.
#[test]
fn test_config_change_full_rebuild() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    for i in 0..5 {
        write(
            dir.path(),
            &format!("content/page-{}.md", i),
            "+++\ntitle = \"P\"\n+++\nbody\n",
        );
    }

    let first = run_build(dir.path());
    assert_eq!(first.pages_built, 5);

    write(dir.path(), "bengal.toml", "title = \"Renamed Site\"\n");
    let second = run_build(dir.path());

    assert!(second.full_rebuild);
    assert_eq!(second.pages_built, 5);
    assert!(second.reasons.is_empty());
}

/// Invariant 7: a no-change rebuild does nothing.
#[test]
fn test_idempotent_incremental_build() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    write(
        dir.path(),
        "content/post.md",
        "+++\ntitle = \"Post\"\ntags = [\"python\"]\n+++\nbody\n",
    );
    write(dir.path(), "content/docs/_index.md", "+++\ntitle = \"Docs\"\n+++\n");
    write(dir.path(), "content/docs/guide.md", "+++\ntitle = \"Guide\"\n+++\nbody\n");
    write(dir.path(), "data/team.yaml", "team: []\n");
    write(dir.path(), "assets/style.css", "body { margin: 0 }\n");

    let first = run_build(dir.path());
    assert!(first.pages_built > 0);

    let second = run_build(dir.path());
    assert_eq!(second.pages_built, 0);
    assert_eq!(second.assets_processed, 0);
    assert!(second.reasons.is_empty());

    // And the round after that, to catch state corrupted by the noop.
    let third = run_build(dir.path());
    assert_eq!(third.pages_built, 0);
}

/// Invariant 6: freshness is monotonic across builds without edits.
#[test]
fn test_forced_touch_rebuilds_one_page() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    write(dir.path(), "content/a.md", "+++\ntitle = \"A\"\n+++\nbody\n");
    write(dir.path(), "content/b.md", "+++\ntitle = \"B\"\n+++\nbody\n");

    run_build(dir.path());

    let options = BuildOptions {
        mode: RenderMode::Sequential,
        touch: vec![dir.path().join("content/a.md")],
        ..Default::default()
    };
    let second = build(dir.path(), &options).unwrap();
    assert_eq!(
        rebuilt_keys(&second),
        BTreeSet::from(["content/a.md".to_string()])
    );
    assert_eq!(reason_of(&second, "content/a.md"), RebuildReasonCode::Forced);
}

/// A `--force` build rebuilds everything but leaves the caches valid: the
/// next incremental build is still a noop.
#[test]
fn test_force_then_incremental() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    write(dir.path(), "content/a.md", "+++\ntitle = \"A\"\n+++\nbody\n");

    run_build(dir.path());

    let forced = build(
        dir.path(),
        &BuildOptions {
            mode: RenderMode::Sequential,
            force: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(forced.full_rebuild);
    assert_eq!(forced.pages_built, 1);

    let after = run_build(dir.path());
    assert_eq!(after.pages_built, 0);
}
