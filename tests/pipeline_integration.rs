use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rmd_core::config::PipelineConfig;
use rmd_core::connection::Credentials;
use rmd_core::contract::{
    Article, Item, MockConverter, MockExtractor, MockSource, RetrieveResponse,
};
use rmd_core::error::SourceError;
use rmd_core::pipeline::{run, Collaborators, SyncReport};
use rmd_core::store::MirrorConnector;
use tempfile::tempdir;

fn config(work_dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(
        work_dir,
        Credentials {
            device: "device".into(),
            session: "session".into(),
        },
    );
    config.poll_interval = Duration::from_millis(10);
    config
}

fn item(id: &str, sort_key: i64) -> Item {
    Item {
        id: id.to_string(),
        given_url: format!("https://example.com/{id}"),
        resolved_url: String::new(),
        sort_key,
    }
}

fn titled_by_url() -> MockExtractor {
    let mut extractor = MockExtractor::new();
    extractor.expect_extract().returning(|url, _| {
        let title = if url.ends_with("/a") { "First" } else { "Second" };
        Ok(Article {
            title: title.into(),
            content: "<p>body</p>".into(),
            format: "html".into(),
            ..Default::default()
        })
    });
    extractor
}

fn writing_converter(conversions: Arc<AtomicUsize>) -> MockConverter {
    let mut converter = MockConverter::new();
    converter.expect_ensure_available().returning(|| Ok(()));
    converter
        .expect_convert()
        .returning(move |_, output: &Path, _| {
            std::fs::write(output, b"epub").unwrap();
            conversions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    converter
}

fn epubs(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.ends_with(".epub"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

async fn run_until(
    config: PipelineConfig,
    collaborators: Collaborators,
    interrupt: impl std::future::Future<Output = ()> + Send + 'static,
) -> SyncReport {
    tokio::time::timeout(Duration::from_secs(10), run(config, collaborators, interrupt))
        .await
        .expect("pipeline must stop after the interrupt")
        .expect("pipeline must start")
}

#[tokio::test]
async fn mirrors_tagged_items_and_drains_on_interrupt() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    std::fs::create_dir(store.path().join("Pocket")).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut source = MockSource::new();
    {
        let calls = calls.clone();
        source.expect_retrieve().returning(move |options| {
            assert_eq!(options.tag.as_deref(), Some("rm"));
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(SourceError::Transport("connection reset".into())),
                1 => Ok(RetrieveResponse {
                    items: vec![item("b", 2), item("a", 1)],
                    since: 100,
                }),
                _ => Ok(RetrieveResponse {
                    items: vec![],
                    since: 100,
                }),
            }
        });
    }

    let collaborators = Collaborators {
        source: Arc::new(source),
        extractor: Arc::new(titled_by_url()),
        converter: Arc::new(writing_converter(Arc::new(AtomicUsize::new(0)))),
        connector: Arc::new(MirrorConnector::new(store.path(), "http://unused")),
    };
    let dest: PathBuf = store.path().join("Pocket");
    let interrupt = async move {
        while epubs(&dest).len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    let report = run_until(config(work.path()), collaborators, interrupt).await;

    assert_eq!(report.spawned, 2);
    assert_eq!(report.poll_failures, 1);
    assert_eq!(report.uploads.uploaded, 2);
    assert_eq!(
        epubs(&store.path().join("Pocket")),
        vec!["First.epub", "Second.epub"]
    );
    assert!(!work.path().join("0").exists());
    assert!(!work.path().join("1").exists());
}

#[tokio::test]
async fn document_already_in_store_is_skipped_and_cleaned_up() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    let dest = store.path().join("Pocket");
    std::fs::create_dir(&dest).unwrap();
    std::fs::write(dest.join("First.epub"), b"older copy").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut source = MockSource::new();
    {
        let calls = calls.clone();
        source.expect_retrieve().returning(move |_| {
            let items = if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                vec![item("a", 1)]
            } else {
                vec![]
            };
            Ok(RetrieveResponse { items, since: 1 })
        });
    }

    let conversions = Arc::new(AtomicUsize::new(0));
    let collaborators = Collaborators {
        source: Arc::new(source),
        extractor: Arc::new(titled_by_url()),
        converter: Arc::new(writing_converter(conversions.clone())),
        connector: Arc::new(MirrorConnector::new(store.path(), "http://unused")),
    };
    let seq_dir = work.path().join("0");
    let interrupt = async move {
        while conversions.load(Ordering::SeqCst) == 0 || seq_dir.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    let report = run_until(config(work.path()), collaborators, interrupt).await;

    assert_eq!(report.spawned, 1);
    assert_eq!(report.uploads.skipped, 1);
    assert_eq!(report.uploads.uploaded, 0);
    assert_eq!(std::fs::read(dest.join("First.epub")).unwrap(), b"older copy");
}
