//! Full-build behavior: outputs on disk, rebuild equivalence, conflicts.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use bengal::build::{BuildOptions, BuildSummary, build};
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
    build(
        root,
        &BuildOptions {
            mode: RenderMode::Sequential,
            ..Default::default()
        },
    )
    .unwrap()
}

/// Relative output path → bytes, for whole-tree comparison.
fn output_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let public = root.join("public");
    walkdir::WalkDir::new(&public)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(&public)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

fn seed_content(root: &Path, about_body: &str) {
    write(
        root,
        "content/_index.md",
        "+++\ntitle = \"Home\"\n+++\nwelcome\n",
    );
    write(
        root,
        "content/about.md",
        &format!("+++\ntitle = \"About\"\n+++\n{}\n", about_body),
    );
    write(
        root,
        "content/blog/post-1.md",
        "+++\ntitle = \"Post 1\"\ntags = [\"python\"]\n+++\nfirst\n",
    );
    write(root, "assets/style.css", "body { margin: 0 }\n");
}

#[test]
fn test_full_build_writes_expected_outputs() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    seed_content(dir.path(), "original");

    let summary = run_build(dir.path());
    assert!(summary.pages_built >= 5); // 3 content + tag page + tag index
    assert_eq!(summary.assets_processed, 1);

    assert!(dir.path().join("public/index.html").exists());
    assert!(dir.path().join("public/about/index.html").exists());
    assert!(dir.path().join("public/blog/post-1/index.html").exists());
    assert!(dir.path().join("public/assets/style.css").exists());

    let html = fs::read_to_string(dir.path().join("public/about/index.html")).unwrap();
    assert!(html.contains("<h1>About</h1>"));
    assert!(html.contains("original"));
}

/// Invariant 8: the same input end state yields byte-identical outputs
/// whether reached by (a) one full build, (b) full build plus a no-change
/// incremental rebuild, or (c) a sequence of edits each followed by an
/// incremental rebuild.
#[test]
fn test_full_rebuild_equivalence() {
    let _guard = build_guard();

    // (a) one full build at the end state.
    let dir_a = tempdir().unwrap();
    init_site(dir_a.path());
    seed_content(dir_a.path(), "final text");
    run_build(dir_a.path());

    // (b) full build then touch-nothing incremental rebuild.
    let dir_b = tempdir().unwrap();
    init_site(dir_b.path());
    seed_content(dir_b.path(), "final text");
    run_build(dir_b.path());
    run_build(dir_b.path());

    // (c) per-file edits, each followed by an incremental rebuild.
    let dir_c = tempdir().unwrap();
    init_site(dir_c.path());
    seed_content(dir_c.path(), "draft one");
    run_build(dir_c.path());
    write(
        dir_c.path(),
        "content/about.md",
        "+++\ntitle = \"About\"\n+++\ndraft two\n",
    );
    run_build(dir_c.path());
    write(
        dir_c.path(),
        "content/about.md",
        "+++\ntitle = \"About\"\n+++\nfinal text\n",
    );
    run_build(dir_c.path());

    let tree_a = output_tree(dir_a.path());
    let tree_b = output_tree(dir_b.path());
    let tree_c = output_tree(dir_c.path());
    assert_eq!(tree_a, tree_b);
    assert_eq!(tree_a, tree_c);
}

/// Two pages claiming one route surface a deduplicated conflict, and the
/// build still succeeds (strict mode turns it into a failing exit).
#[test]
fn test_url_conflict_reported() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    write(dir.path(), "content/about.md", "+++\ntitle = \"A\"\n+++\none\n");
    write(
        dir.path(),
        "content/about/index.md",
        "+++\ntitle = \"B\"\n+++\ntwo\n",
    );

    let summary = run_build(dir.path());
    assert!(summary.has_errors());
    assert!(
        summary
            .errors
            .iter()
            .any(|(category, _, _)| category == "url_conflict")
    );
}

/// Malformed frontmatter skips the page, reports once, and the build
/// continues.
#[test]
fn test_malformed_page_skipped_and_reported() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    write(dir.path(), "content/good.md", "+++\ntitle = \"Good\"\n+++\nok\n");
    for i in 0..3 {
        write(
            dir.path(),
            &format!("content/bad-{}.md", i),
            "+++\ntitle = = broken\n+++\nx\n",
        );
    }

    let summary = run_build(dir.path());
    assert!(dir.path().join("public/good/index.html").exists());
    // Three identical parse errors collapse into one entry with a count.
    let parse_errors: Vec<_> = summary
        .errors
        .iter()
        .filter(|(category, _, _)| category == "frontmatter_parse_error")
        .collect();
    assert_eq!(parse_errors.len(), 1);
    assert_eq!(parse_errors[0].1, 3);
}

/// Incremental disabled in config means every build renders everything.
#[test]
fn test_incremental_disabled_by_config() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    write(
        dir.path(),
        "bengal.toml",
        "title = \"Fixture Site\"\nincremental = false\n",
    );
    write(dir.path(), "content/a.md", "+++\ntitle = \"A\"\n+++\nbody\n");

    let first = run_build(dir.path());
    let second = run_build(dir.path());
    assert_eq!(first.pages_built, 1);
    assert_eq!(second.pages_built, 1);
    assert!(second.full_rebuild);
}

/// Deleting the cache directory degrades to a full rebuild, not an error.
#[test]
fn test_cache_deletion_recovers() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    write(dir.path(), "content/a.md", "+++\ntitle = \"A\"\n+++\nbody\n");

    run_build(dir.path());
    fs::remove_dir_all(dir.path().join(".bengal")).unwrap();

    let second = run_build(dir.path());
    assert_eq!(second.pages_built, 1);

    let third = run_build(dir.path());
    assert_eq!(third.pages_built, 0);
}

/// Corrupt cache files are discarded and rebuilt, never fatal.
#[test]
fn test_corrupt_cache_recovers() {
    let _guard = build_guard();
    let dir = tempdir().unwrap();
    init_site(dir.path());
    write(dir.path(), "content/a.md", "+++\ntitle = \"A\"\n+++\nbody\n");

    run_build(dir.path());
    write(dir.path(), ".bengal/build-cache.json.zst", "{corrupt");
    write(dir.path(), ".bengal/effects.json", "also corrupt");

    let second = run_build(dir.path());
    assert_eq!(second.pages_built, 1);
}

/// Parallel and sequential modes produce identical outputs.
#[test]
fn test_parallel_matches_sequential_outputs() {
    let _guard = build_guard();

    let dir_seq = tempdir().unwrap();
    init_site(dir_seq.path());
    for i in 0..12 {
        write(
            dir_seq.path(),
            &format!("content/page-{:02}.md", i),
            &format!("+++\ntitle = \"Page {}\"\n+++\nbody {}\n", i, i),
        );
    }
    run_build(dir_seq.path());

    let dir_par = tempdir().unwrap();
    init_site(dir_par.path());
    for i in 0..12 {
        write(
            dir_par.path(),
            &format!("content/page-{:02}.md", i),
            &format!("+++\ntitle = \"Page {}\"\n+++\nbody {}\n", i, i),
        );
    }
    build(
        dir_par.path(),
        &BuildOptions {
            mode: RenderMode::Parallel,
            workers: 4,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(output_tree(dir_seq.path()), output_tree(dir_par.path()));
}
