//! End-to-end runs against an in-memory site or a mock HTTP server, with a
//! scripted model.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use docmodules_core::{PipelineDeps, RunConfig, SilentProgress, run};
use docmodules_crawler::HttpFetcher;
use docmodules_crawler::testing::StaticSite;
use docmodules_extractor::testing::{Reply, ScriptedModel};
use docmodules_shared::{
    AppConfig, CrawlConfig, DocModulesError, ExtractConfig, NormalizeConfig, Renderer,
};

const DOCS: &str = r#"<html><head><title>Docs Home</title></head><body>
    <nav><a href="/">Home</a></nav>
    <main>
      <h1>Product documentation</h1>
      <p>The product is organised into account management, billing and reporting areas.</p>
      <a href="/docs/intro">Introduction</a>
      <a href="https://other.com">Partner site</a>
    </main></body></html>"#;

const INTRO: &str = r#"<html><head><title>Introduction</title></head><body><main>
      <h1>Introduction</h1>
      <p>Account management covers login, profiles and roles for every user of the product.</p>
    </main></body></html>"#;

fn output_path(label: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("dm-run-{label}-{}", uuid::Uuid::now_v7()))
        .join("extracted_modules.json")
}

fn run_config(seed: &str, output: Option<PathBuf>) -> RunConfig {
    let app = AppConfig::default();
    let mut crawl = CrawlConfig::from(&app);
    crawl.max_depth = 1;
    crawl.renderer = Renderer::Http;
    crawl.cache_dir = None;
    crawl.fetch_timeout = Duration::from_secs(5);

    RunConfig {
        seeds: vec![Url::parse(seed).unwrap()],
        output,
        crawl,
        normalize: NormalizeConfig { min_text_chars: 20 },
        extract: ExtractConfig {
            model_timeout: Duration::from_millis(200),
            max_attempts: 2,
            batch_char_budget: 0,
        },
    }
}

fn example_site() -> Arc<StaticSite> {
    Arc::new(
        StaticSite::new()
            .page("https://example.com/docs", DOCS)
            .page("https://example.com/docs/intro", INTRO)
            .page("https://other.com", "<main><p>Partner content that must not be fetched.</p></main>"),
    )
}

fn deps(fetcher: Arc<StaticSite>, model: Arc<ScriptedModel>) -> PipelineDeps {
    PipelineDeps {
        fetcher,
        model,
        cancel: CancellationToken::new(),
    }
}

#[tokio::test]
async fn crawls_internal_link_and_records_external() {
    let site = example_site();
    let model = Arc::new(ScriptedModel::always("{}"));
    let out = output_path("crawl-set");

    let report = run(
        &run_config("https://example.com/docs", Some(out.clone())),
        deps(site.clone(), model.clone()),
        &SilentProgress,
    )
    .await
    .unwrap();

    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.external_links, 1);
    assert_eq!(site.fetch_count("https://example.com/docs"), 1);
    assert_eq!(site.fetch_count("https://example.com/docs/intro"), 1);
    assert_eq!(site.fetch_count("https://other.com"), 0);

    // One prompt per document, in crawl order.
    let prompts = model.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("Documentation Title: Docs Home\nURL: https://example.com/docs\n"));
    assert!(prompts[1].contains("URL: https://example.com/docs/intro"));
}

#[tokio::test]
async fn empty_object_everywhere_is_a_successful_empty_run() {
    let out = output_path("empty");
    let report = run(
        &run_config("https://example.com/docs", Some(out.clone())),
        deps(example_site(), Arc::new(ScriptedModel::always("{}"))),
        &SilentProgress,
    )
    .await
    .unwrap();

    assert!(report.result.is_empty());
    assert!(report.failed_units.is_empty());
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "{}\n");
}

#[tokio::test]
async fn all_model_timeouts_fail_without_output() {
    let out = output_path("timeouts");
    let err = run(
        &run_config("https://example.com/docs", Some(out.clone())),
        deps(example_site(), Arc::new(ScriptedModel::hanging())),
        &SilentProgress,
    )
    .await
    .unwrap_err();

    assert!(err.is_model_failure(), "{err}");
    assert!(!out.exists());
}

#[tokio::test]
async fn results_merge_across_pages() {
    let model = Arc::new(
        ScriptedModel::always("{}")
            .then(Reply::Text(
                r#"{"Account Management": {"Description": "Users and access", "Submodules": {"Login": "Sign in"}}}"#.into(),
            ))
            .then(Reply::Text(
                r#"Sure! {"Account Management": {"Description": "Later text", "Submodules": {"Roles": "Permissions"}}"#.into(),
            )),
    );
    let out = output_path("merge");
    let report = run(
        &run_config("https://example.com/docs", Some(out.clone())),
        deps(example_site(), model),
        &SilentProgress,
    )
    .await
    .unwrap();

    let module = report.result.get("Account Management").unwrap();
    assert_eq!(module.description, "Users and access");
    assert_eq!(module.submodules.len(), 2);
    assert_eq!(report.repaired, 1);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(written["Account Management"]["Submodules"]["Roles"], "Permissions");
}

#[tokio::test]
async fn model_timeout_on_one_page_keeps_the_rest() {
    let model = Arc::new(
        ScriptedModel::always(r#"{"Billing": {"Description": "Invoices", "Submodules": {}}}"#)
            .then(Reply::Hang)
            .then(Reply::Hang),
    );
    let out = output_path("one-timeout");
    let report = run(
        &run_config("https://example.com/docs", Some(out.clone())),
        deps(example_site(), model),
        &SilentProgress,
    )
    .await
    .unwrap();

    assert_eq!(report.failed_units.len(), 1);
    assert_eq!(report.failed_units[0].urls, vec!["https://example.com/docs".to_string()]);
    assert!(report.result.get("Billing").is_some());
    assert!(out.exists());
}

#[tokio::test]
async fn one_bad_response_keeps_the_rest() {
    let model = Arc::new(
        ScriptedModel::always(r#"{"Billing": {"Description": "Invoices", "Submodules": {}}}"#)
            .then(Reply::Text("no idea".into()))
            .then(Reply::Text("still no idea".into())),
    );
    let report = run(
        &run_config("https://example.com/docs", None),
        deps(example_site(), model),
        &SilentProgress,
    )
    .await
    .unwrap();

    assert_eq!(report.failed_units.len(), 1);
    assert_eq!(report.failed_units[0].urls, vec!["https://example.com/docs".to_string()]);
    assert!(report.result.get("Billing").is_some());
}

#[tokio::test]
async fn unreachable_seed_is_a_config_error() {
    let model = Arc::new(ScriptedModel::always("{}"));
    let err = run(
        &run_config("https://example.com/missing", None),
        deps(example_site(), model.clone()),
        &SilentProgress,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DocModulesError::Config { .. }), "{err}");
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn near_empty_pages_are_excluded() {
    let site = Arc::new(
        StaticSite::new()
            .page("https://example.com/docs", DOCS)
            .page("https://example.com/docs/intro", "<main><p>Soon.</p></main>"),
    );
    let model = Arc::new(ScriptedModel::always("{}"));
    let report = run(
        &run_config("https://example.com/docs", None),
        deps(site, model.clone()),
        &SilentProgress,
    )
    .await
    .unwrap();

    assert_eq!(report.documents, 1);
    assert_eq!(report.excluded, vec!["https://example.com/docs/intro".to_string()]);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn http_site_end_to_end() {
    let server = MockServer::start().await;
    let home = r#"<html><head><title>Guide</title></head><body><main>
        <h1>Guide</h1><p>Search lets users find records by keyword and by filters.</p>
        <a href="/search">Search</a></main></body></html>"#;
    let search = r#"<html><body><main><h1>Search</h1>
        <p>Filters narrow results by date, owner and status of every record.</p></main></body></html>"#;

    for (p, body) in [("/", home), ("/search", search)] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut config = run_config(&server.uri(), None);
    config.crawl.allow_private_hosts = true;

    let model = Arc::new(ScriptedModel::always(
        r#"{"Search": {"Description": "Find records", "Submodules": {"Filters": "Narrow results"}}}"#,
    ));
    let report = run(
        &config,
        PipelineDeps {
            fetcher: Arc::new(HttpFetcher::new(Duration::from_secs(5)).unwrap()),
            model,
            cancel: CancellationToken::new(),
        },
        &SilentProgress,
    )
    .await
    .unwrap();

    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.result.len(), 1);
    assert_eq!(report.result.get("Search").unwrap().submodules["Filters"], "Narrow results");
}
