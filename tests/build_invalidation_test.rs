//! Build invalidation integration tests.
//!
//! These exercise the incremental engine end to end through temp sites:
//! idempotent rebuilds, content/deletion/template change propagation, the
//! importer version bump, and the failed-render retry policy.

mod common;

use common::{registry_with_markdown_version, TestSite, T0};
use strata_core::query::QueryDescription;

const POST_A: &str = "\
---
title: A
category: post
template: post.html
---

First body.
";

const PAGE_B: &str = "\
---
title: B
category: page
template: page.html
queries:
  posts:
    include_categories: [post]
    order: ascending
---

Page body.
";

fn seed_two_document_site() -> TestSite {
    let site = TestSite::new();
    site.write_content("a.md", POST_A, T0);
    site.write_content("b.md", PAGE_B, T0);
    site.write_template(
        "post.html",
        "<article>{{ document.contents }}</article>",
        T0,
    );
    site.write_template(
        "page.html",
        "<ul>{% query \"posts\" %}<li>{{ item.title }}</li>{% end %}</ul>",
        T0,
    );
    site
}

#[tokio::test]
async fn idempotent_rebuild_does_no_work() {
    let site = seed_two_document_site();

    let first = site.builder().await.build().await.unwrap();
    assert!(first.is_clean(), "failures: {:?}", first.failures);
    assert_eq!(first.imported.len(), 2);
    assert_eq!(first.rendered.len(), 2);

    // Second pass with no source changes: zero re-imports, zero re-renders.
    let second = site.builder().await.build().await.unwrap();
    assert!(second.is_clean());
    assert!(second.imported.is_empty(), "re-imported: {:?}", second.imported);
    assert!(second.rendered.is_empty(), "re-rendered: {:?}", second.rendered);
    assert_eq!(second.skipped_imports, 2);
    assert_eq!(second.skipped_renders, 2);
}

#[tokio::test]
async fn rendered_output_lands_under_build_files() {
    let site = seed_two_document_site();
    site.builder().await.build().await.unwrap();

    let a = std::fs::read_to_string(site.output_path("a/index.html")).unwrap();
    assert!(a.contains("<article>"));
    assert!(a.contains("First body."));

    // /b's query over posts saw /a.
    let b = std::fs::read_to_string(site.output_path("b/index.html")).unwrap();
    assert_eq!(b, "<ul><li>A</li></ul>");
}

#[tokio::test]
async fn content_change_re_renders_querying_documents() {
    let site = seed_two_document_site();
    site.builder().await.build().await.unwrap();

    // Edit /a's content only: new modification time, new content.
    site.write_content(
        "a.md",
        &POST_A.replace("First body.", "Second body."),
        T0 + 10,
    );

    let report = site.builder().await.build().await.unwrap();
    assert_eq!(report.imported, vec!["a.md".to_string()]);

    // /a re-renders (fingerprint changed); /b re-renders too, because its
    // recorded query's fingerprint set changed when /a's fingerprint did,
    // even though /b's own content is untouched.
    let mut rendered = report.rendered.clone();
    rendered.sort();
    assert_eq!(rendered, vec!["/a".to_string(), "/b".to_string()]);

    let b = std::fs::read_to_string(site.output_path("b/index.html")).unwrap();
    assert_eq!(b, "<ul><li>A</li></ul>");
    let a = std::fs::read_to_string(site.output_path("a/index.html")).unwrap();
    assert!(a.contains("Second body."));
}

#[tokio::test]
async fn deleting_a_source_file_removes_document_and_assets() {
    let site = seed_two_document_site();
    site.write_content("static/logo.png", "png-bytes", T0);

    let first = site.builder().await.build().await.unwrap();
    assert_eq!(first.imported.len(), 3);
    assert!(site.output_path("static/logo.png").exists());

    site.remove_content("a.md");
    site.remove_content("static/logo.png");

    let builder = site.builder().await;
    let report = builder.build().await.unwrap();
    let mut deleted = report.deleted.clone();
    deleted.sort();
    assert_eq!(
        deleted,
        vec!["a.md".to_string(), "static/logo.png".to_string()]
    );

    // Document and owned assets are absent after the import phase.
    let docs = builder
        .store()
        .documents(&QueryDescription::all())
        .await
        .unwrap();
    let urls: Vec<&str> = docs.iter().map(|d| d.url.as_str()).collect();
    assert_eq!(urls, vec!["/b"]);
    assert!(builder
        .store()
        .assets_for("static/logo.png")
        .await
        .unwrap()
        .is_empty());
    assert!(!site.output_path("static/logo.png").exists());

    // /b re-renders: its recorded query no longer includes /a.
    assert_eq!(report.rendered, vec!["/b".to_string()]);
    let b = std::fs::read_to_string(site.output_path("b/index.html")).unwrap();
    assert_eq!(b, "<ul></ul>");
}

#[tokio::test]
async fn touching_a_template_re_renders_only_its_documents() {
    let site = seed_two_document_site();
    site.builder().await.build().await.unwrap();

    // New modification time, identical content, no document changed.
    site.touch_template("post.html", T0 + 20);

    let report = site.builder().await.build().await.unwrap();
    assert!(report.imported.is_empty());
    assert_eq!(report.rendered, vec!["/a".to_string()]);
    assert_eq!(report.skipped_renders, 1);
}

#[tokio::test]
async fn importer_version_bump_forces_reimport_of_matched_files() {
    let site = seed_two_document_site();

    let first = site
        .builder_with_registry(registry_with_markdown_version(3))
        .await
        .build()
        .await
        .unwrap();
    assert_eq!(first.imported.len(), 2);

    // No file changes; only the importer version moves from 3 to 4.
    let report = site
        .builder_with_registry(registry_with_markdown_version(4))
        .await
        .build()
        .await
        .unwrap();
    let mut imported = report.imported.clone();
    imported.sort();
    assert_eq!(imported, vec!["a.md".to_string(), "b.md".to_string()]);

    // The re-imported documents are byte-identical, so nothing re-renders.
    assert!(report.rendered.is_empty(), "re-rendered: {:?}", report.rendered);
}

#[tokio::test]
async fn import_failure_is_attributed_without_aborting_the_batch() {
    let site = seed_two_document_site();
    // Unparseable front matter.
    site.write_content("broken.md", "---\ntitle: [unclosed\n---\nbody\n", T0);

    let report = site.builder().await.build().await.unwrap();
    assert_eq!(report.failures.len(), 1);
    let failure = format!("{}", report.failures[0]);
    assert!(failure.contains("broken.md"), "unattributed: {failure}");

    // The other files imported and rendered regardless.
    assert_eq!(report.imported.len(), 2);
    assert_eq!(report.rendered.len(), 2);
}

#[tokio::test]
async fn failed_render_persists_no_status_and_is_retried() {
    let site = TestSite::new();
    site.write_content("a.md", POST_A, T0);
    site.write_content("b.md", PAGE_B, T0);
    site.write_template(
        "post.html",
        "<article>{{ document.contents }}</article>",
        T0,
    );
    // page.html includes a partial that does not exist yet.
    site.write_template(
        "page.html",
        "{% include \"header.html\" %}<main>{{ document.title }}</main>",
        T0,
    );

    let builder = site.builder().await;
    let report = builder.build().await.unwrap();
    assert_eq!(report.rendered, vec!["/a".to_string()]);
    assert_eq!(report.failures.len(), 1);
    assert!(format!("{}", report.failures[0]).contains("/b"));

    // No render status was persisted for the failed document.
    let statuses = builder.store().all_render_statuses().await.unwrap();
    assert!(statuses.contains_key("/a"));
    assert!(!statuses.contains_key("/b"));

    // Supplying the missing partial lets the next build retry /b; /a stays
    // untouched.
    site.write_template("header.html", "<header>hi</header>", T0);
    let retry = site.builder().await.build().await.unwrap();
    assert!(retry.is_clean());
    assert_eq!(retry.rendered, vec!["/b".to_string()]);

    let b = std::fs::read_to_string(site.output_path("b/index.html")).unwrap();
    assert_eq!(b, "<header>hi</header><main>B</main>");
}

#[tokio::test]
async fn included_templates_are_recorded_dependencies() {
    let site = TestSite::new();
    site.write_content("b.md", PAGE_B, T0);
    site.write_template(
        "page.html",
        "{% include \"header.html\" %}<main>{{ document.title }}</main>",
        T0,
    );
    site.write_template("header.html", "<header>v1</header>", T0);
    site.builder().await.build().await.unwrap();

    // Touching only the transitively included partial re-renders the page.
    site.touch_template("header.html", T0 + 30);
    let report = site.builder().await.build().await.unwrap();
    assert_eq!(report.rendered, vec!["/b".to_string()]);
}

#[tokio::test]
async fn unsupported_site_version_is_fatal_before_any_work() {
    let site = TestSite::with_config("version: 2\ntitle: X\n");
    let registry = strata_core::importer::ImporterRegistry::builtin();
    let err = strata_core::config::Site::load(site.dir.path(), &registry).unwrap_err();
    assert!(matches!(err, strata_core::StrataError::Config(_)));
}
