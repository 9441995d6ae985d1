use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use assetsync_core::RemoteStoreClient;
use assetsyncd::config::AppConfig;
use assetsyncd::logging;
use assetsyncd::sync::cache::TreeCache;
use assetsyncd::sync::commit::CommitService;
use assetsyncd::sync::executor::{EventSink, UploadEvent, UploadExecutor};
use assetsyncd::sync::loader::RemoteLoader;
use assetsyncd::sync::notify::{Notification, Notifier};
use assetsyncd::sync::orchestrator::UploadOrchestrator;
use assetsyncd::sync::preview::PreviewRegistry;
use assetsyncd::sync::queue::{FileSelection, UploadQueue};
use assetsyncd::sync::resolver::FolderTarget;
use assetsyncd::sync::retry::{Backoff, RetryPolicy};
use assetsyncd::sync::store::TreeStore;
use assetsyncd::sync::transfer::{BlobClient, TransferConfig};
use tokio::sync::mpsc::UnboundedReceiver;

const USAGE: &str = "Usage: assetsyncd <command>
  upload --project ID [--folder ID] [--license TYPE] FILE...
                        Upload files and commit them into a project
  load --project ID [--refresh]
                        Print a project tree, fetching it when not cached
  repair                Run integrity repair on the cached tree";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Upload {
        project: String,
        folder: Option<String>,
        license: Option<String>,
        files: Vec<PathBuf>,
    },
    Load {
        project: String,
        refresh: bool,
    },
    Repair,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let command = match args.next() {
        None => return Ok(CliMode::Help),
        Some(command) => command,
    };
    match command.as_str() {
        "--help" | "-h" | "help" => Ok(CliMode::Help),
        "repair" => match args.next() {
            None => Ok(CliMode::Repair),
            Some(other) => anyhow::bail!("unknown argument: {other}"),
        },
        "load" => {
            let mut project = None;
            let mut refresh = false;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--project" => project = Some(value_for(&mut args, "--project")?),
                    "--refresh" => refresh = true,
                    other => anyhow::bail!("unknown argument: {other}"),
                }
            }
            Ok(CliMode::Load {
                project: project.context("load requires --project")?,
                refresh,
            })
        }
        "upload" => {
            let mut project = None;
            let mut folder = None;
            let mut license = None;
            let mut files = Vec::new();
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--project" => project = Some(value_for(&mut args, "--project")?),
                    "--folder" => folder = Some(value_for(&mut args, "--folder")?),
                    "--license" => license = Some(value_for(&mut args, "--license")?),
                    other if other.starts_with("--") => anyhow::bail!("unknown argument: {other}"),
                    file => files.push(PathBuf::from(file)),
                }
            }
            Ok(CliMode::Upload {
                project: project.context("upload requires --project")?,
                folder,
                license,
                files,
            })
        }
        other => anyhow::bail!("unknown command: {other}"),
    }
}

fn value_for<I>(args: &mut I, flag: &str) -> anyhow::Result<String>
where
    I: Iterator<Item = String>,
{
    args.next()
        .with_context(|| format!("{flag} requires a value"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("{USAGE}");
        return Ok(());
    }
    logging::init()?;

    let config = AppConfig::from_env()?;
    let cache = TreeCache::open(&config.cache_db)
        .await
        .with_context(|| format!("failed to open cache at {}", config.cache_db.display()))?;
    let store = Arc::new(
        TreeStore::open(cache, PreviewRegistry::new())
            .await
            .context("failed to load project tree")?,
    );
    let remote = config
        .remote_url
        .as_deref()
        .map(|url| RemoteStoreClient::with_base_url(url, config.api_key.clone()))
        .transpose()
        .context("invalid ASSETSYNC_REMOTE_URL")?;
    let (notifier, mut notes) = Notifier::channel();

    let result = match mode {
        CliMode::Repair => {
            let report = store.ensure_integrity().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        CliMode::Load { project, refresh } => {
            run_load(&config, store, remote, notifier, &project, refresh).await
        }
        CliMode::Upload {
            project,
            folder,
            license,
            files,
        } => {
            let license = license.unwrap_or_else(|| config.license_type.clone());
            let target = FolderTarget::parse(folder.as_deref());
            run_upload(&config, store, remote, notifier, &project, &target, &license, files).await
        }
        CliMode::Help => Ok(()),
    };
    print_notifications(&mut notes);
    result
}

async fn run_load(
    config: &AppConfig,
    store: Arc<TreeStore>,
    remote: Option<RemoteStoreClient>,
    notifier: Notifier,
    project_id: &str,
    refresh: bool,
) -> anyhow::Result<()> {
    let project = match remote {
        Some(client) => {
            let loader = RemoteLoader::new(client, store, notifier, config.retry_base);
            if refresh {
                loader.refresh(project_id, config.max_retries).await
            } else {
                loader.load(project_id, config.max_retries).await
            }
        }
        None => {
            if refresh {
                anyhow::bail!("--refresh requires ASSETSYNC_REMOTE_URL");
            }
            store.project(project_id).await
        }
    };
    let project = project.with_context(|| format!("project {project_id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&project)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_upload(
    config: &AppConfig,
    store: Arc<TreeStore>,
    remote: Option<RemoteStoreClient>,
    notifier: Notifier,
    project_id: &str,
    target: &FolderTarget,
    license_type: &str,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let blob_url = config
        .blob_url
        .as_deref()
        .context("ASSETSYNC_BLOB_URL is not set")?;
    let blob = BlobClient::with_config(
        blob_url,
        TransferConfig {
            upload_concurrency: config.upload_concurrency,
        },
    )
    .context("invalid ASSETSYNC_BLOB_URL")?;

    let mut selection: FileSelection = files.into_iter().collect();
    let mut queue = UploadQueue::default();
    queue.enqueue_selection(&mut selection).await;

    let (events, event_rx) = EventSink::channel();
    let progress = tokio::spawn(render_progress(event_rx));

    let executor = UploadExecutor::new(blob).with_events(events);
    let mut commit = CommitService::new(Arc::clone(&store)).with_policy(config.recovery_policy);
    let mut orchestrator_loader = None;
    if let Some(client) = remote {
        let write_retry = RetryPolicy::new(
            config.max_retries,
            Backoff::exponential(config.retry_base, config.retry_base * 16, true),
        );
        commit = commit.with_remote(client.clone(), write_retry);
        orchestrator_loader = Some(RemoteLoader::new(
            client,
            Arc::clone(&store),
            notifier.clone(),
            config.retry_base,
        ));
    }
    let mut orchestrator = UploadOrchestrator::new(store, executor, commit, notifier);
    if let Some(loader) = orchestrator_loader {
        orchestrator = orchestrator.with_loader(loader, config.max_retries);
    }

    let outcome = orchestrator
        .submit(project_id, target, license_type, queue.items_mut())
        .await;
    drop(orchestrator);
    progress.await.ok();

    let summary = outcome?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !summary.success {
        anyhow::bail!("no files were committed ({:?})", summary.outcome);
    }
    Ok(())
}

async fn render_progress(mut events: UnboundedReceiver<UploadEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::Item(file) => {
                if let Some(error) = &file.error {
                    eprintln!("[assetsyncd] {} failed: {error}", file.name);
                }
            }
            UploadEvent::Aggregate { progress } => eprintln!("[assetsyncd] progress {progress}%"),
            UploadEvent::Finished(_) => {}
        }
    }
}

fn print_notifications(notes: &mut UnboundedReceiver<Notification>) {
    while let Ok(note) = notes.try_recv() {
        eprintln!("[assetsyncd] {:?}: {}", note.level, note.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("assetsyncd")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parse_cli_mode_defaults_to_help() {
        assert_eq!(parse_cli_mode(args(&[])).unwrap(), CliMode::Help);
        assert_eq!(parse_cli_mode(args(&["--help"])).unwrap(), CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_supports_upload() {
        let mode = parse_cli_mode(args(&[
            "upload", "--project", "p1", "--folder", "f1", "a.png", "b.txt",
        ]))
        .unwrap();
        assert_eq!(
            mode,
            CliMode::Upload {
                project: "p1".into(),
                folder: Some("f1".into()),
                license: None,
                files: vec![PathBuf::from("a.png"), PathBuf::from("b.txt")],
            }
        );
    }

    #[test]
    fn parse_cli_mode_supports_load_and_repair() {
        assert_eq!(
            parse_cli_mode(args(&["load", "--project", "p1", "--refresh"])).unwrap(),
            CliMode::Load {
                project: "p1".into(),
                refresh: true,
            }
        );
        assert_eq!(parse_cli_mode(args(&["repair"])).unwrap(), CliMode::Repair);
    }

    #[test]
    fn parse_cli_mode_rejects_bad_input() {
        assert!(parse_cli_mode(args(&["upload", "a.png"])).is_err());
        assert!(parse_cli_mode(args(&["load", "--project"])).is_err());
        assert!(parse_cli_mode(args(&["sync"])).is_err());
        assert!(parse_cli_mode(args(&["upload", "--project", "p1", "--force"])).is_err());
    }
}
