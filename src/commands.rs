// CLI command implementations over a filesystem corpus.
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use asset_audit::config::Config;
use asset_audit::identity::strip_object_suffix;
use asset_audit::listener::{ChangeListener, StartupSweep};
use asset_audit::{
    ArtifactStore, AssetIdentity, AuditReport, BlueprintSummarizer, DependencyQueryServer,
    FsRegistry, IncrementalAuditCache, Staleness,
};

const LISTENER_POLL: Duration = Duration::from_millis(100);

/// Registry, cache and config wired for one project directory.
pub struct Session {
    project: PathBuf,
    config: Config,
    registry: Arc<FsRegistry>,
    cache: Arc<IncrementalAuditCache>,
}

impl Session {
    pub fn open(project: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load(config_path)?;
        config.validate()?;
        let namespace = config.audit.namespace()?;

        let registry = Arc::new(FsRegistry::new(
            config.audit.content_dir(project),
            namespace.clone(),
            &config.audit.asset_extension,
        ));
        let store = ArtifactStore::new(config.audit.audit_root(project), namespace);
        let cache = IncrementalAuditCache::new(
            registry.clone(),
            Arc::new(BlueprintSummarizer),
            store,
        )
        .with_release_interval(config.audit.release_interval);

        Ok(Self {
            project: project.to_path_buf(),
            config,
            registry,
            cache: Arc::new(cache),
        })
    }

    fn scan(&self) -> Result<usize> {
        self.registry.scan().with_context(|| {
            format!(
                "Failed to scan corpus at {}",
                self.registry.content_root().display()
            )
        })
    }

    fn server(&self) -> DependencyQueryServer {
        DependencyQueryServer::new(
            self.registry.clone(),
            self.config.server.to_server_config(&self.project),
        )
    }
}

fn parse_asset(raw: &str) -> Result<AssetIdentity> {
    AssetIdentity::parse(strip_object_suffix(raw.trim()))
        .with_context(|| format!("Invalid asset path {raw:?}"))
}

/// Ctrl-C sets the returned flag (and any extra flags passed in).
fn install_shutdown_handler(also: Vec<Arc<AtomicBool>>) -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        for f in &also {
            f.store(true, Ordering::SeqCst);
        }
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(shutdown)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchOutput<'a> {
    #[serde(flatten)]
    report: &'a AuditReport,
    swept: Option<usize>,
}

#[derive(Serialize)]
struct AssetOutput {
    asset: String,
    status: String,
    /// `None` for assets outside the audited namespace.
    output: Option<PathBuf>,
}

impl AssetOutput {
    fn output_display(&self) -> String {
        match &self.output {
            Some(path) => path.display().to_string(),
            None => "(outside namespace)".to_string(),
        }
    }
}

pub fn audit(
    session: &Session,
    asset: Option<&str>,
    output: Option<&Path>,
    force: bool,
    json: bool,
) -> Result<()> {
    session.scan()?;
    let cache = &session.cache;

    if let Some(raw) = asset {
        let identity = parse_asset(raw)?;
        let out = match output {
            // explicit destination: always derive, leave the record tree untouched
            Some(path) => {
                let record = cache
                    .derive_record(&identity)
                    .with_context(|| format!("Failed to audit {identity}"))?;
                cache
                    .store()
                    .write(&record, path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                AssetOutput {
                    asset: identity.to_string(),
                    status: "audited".to_string(),
                    output: Some(path.to_path_buf()),
                }
            }
            None => {
                let staleness = cache.check_staleness(&identity);
                let status = if staleness == Staleness::UpToDate && !force {
                    "up-to-date"
                } else {
                    cache
                        .audit_one(&identity)
                        .with_context(|| format!("Failed to audit {identity}"))?;
                    "audited"
                };
                AssetOutput {
                    asset: identity.to_string(),
                    status: status.to_string(),
                    output: cache.output_path(&identity),
                }
            }
        };
        if json {
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            let label = if out.status == "audited" {
                out.status.green()
            } else {
                out.status.dimmed()
            };
            println!("{} {} -> {}", label, out.asset, out.output_display());
        }
        return Ok(());
    }

    install_shutdown_handler(vec![cache.cancel_flag()])?;
    let report = cache.audit_all(force);
    let swept = if report.interrupted {
        None
    } else {
        Some(cache.sweep_orphans().context("Orphan sweep failed")?)
    };

    if json {
        let out = BatchOutput {
            report: &report,
            swept,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "Asset audit".bold());
    println!("════════════════════════════════════════");
    println!("Scanned:      {}", report.scanned);
    println!("Up to date:   {}", report.up_to_date);
    println!("Re-audited:   {}", report.reaudited.to_string().green());
    if report.failed > 0 {
        println!("Failed:       {}", report.failed.to_string().red());
    } else {
        println!("Failed:       0");
    }
    match swept {
        Some(n) => println!("Swept:        {n}"),
        None => println!("Swept:        {}", "skipped (interrupted)".yellow()),
    }
    println!("Elapsed:      {} ms", report.elapsed_ms);
    for failure in &report.failures {
        println!("  {} {}: {}", "✗".red(), failure.asset, failure.reason);
    }
    Ok(())
}

pub fn status(session: &Session, asset: &str, json: bool) -> Result<()> {
    session.scan()?;
    let identity = parse_asset(asset)?;
    let staleness = session.cache.check_staleness(&identity);
    let out = AssetOutput {
        asset: identity.to_string(),
        status: staleness.label().to_string(),
        output: session.cache.output_path(&identity),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    let label = match staleness {
        Staleness::UpToDate => out.status.green(),
        Staleness::Stale(_) => out.status.yellow(),
        Staleness::Missing => out.status.red(),
        Staleness::Excluded => out.status.dimmed(),
    };
    println!("{}: {}", out.asset, label);
    println!("record: {}", out.output_display());
    Ok(())
}

pub fn sweep(session: &Session) -> Result<()> {
    session.scan()?;
    let swept = session.cache.sweep_orphans().context("Orphan sweep failed")?;
    println!("Swept {swept} orphaned record(s)");
    Ok(())
}

pub fn serve(session: &Session) -> Result<()> {
    session.scan()?;
    let server = session.server();
    if !server.start() {
        anyhow::bail!(
            "No free port in {}-{}",
            session.config.server.port_start,
            session.config.server.port_end
        );
    }
    let shutdown = install_shutdown_handler(Vec::new())?;
    if let Some(port) = server.port() {
        eprintln!("asset-audit: listening on http://127.0.0.1:{port} (Ctrl-C to stop)");
    }
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(LISTENER_POLL);
    }
    server.stop();
    Ok(())
}

pub fn watch(session: &Session, debounce_ms: u64, with_server: bool) -> Result<()> {
    let shutdown = install_shutdown_handler(vec![session.cache.cancel_flag()])?;

    let listener = ChangeListener::new(session.cache.clone());
    let events = listener.attach();
    let _watcher = session
        .registry
        .watch(Duration::from_millis(debounce_ms))
        .context("Failed to watch corpus")?;

    let scanner = {
        let registry = session.registry.clone();
        std::thread::spawn(move || {
            if let Err(e) = registry.scan() {
                tracing::error!(error = %e, "corpus scan failed");
            }
        })
    };

    let startup = {
        let sweep = StartupSweep::new(session.cache.clone());
        let shutdown = Arc::clone(&shutdown);
        let interval = Duration::from_millis(session.config.audit.ready_poll_ms.max(1));
        std::thread::spawn(move || {
            if let Some(report) = sweep.run_blocking(interval, &shutdown) {
                eprintln!(
                    "asset-audit: startup audit {} re-audited, {} up to date, {} failed, swept {}",
                    report.audit.reaudited,
                    report.audit.up_to_date,
                    report.audit.failed,
                    report
                        .swept
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-".into())
                );
            }
        })
    };

    let server = with_server.then(|| session.server());
    if let Some(server) = &server {
        match (server.start(), server.port()) {
            (true, Some(port)) => eprintln!("asset-audit: query server on http://127.0.0.1:{port}"),
            _ => eprintln!("asset-audit: query server not started (no free port)"),
        }
    }

    eprintln!(
        "asset-audit: watching {} (Ctrl-C to stop)",
        session.registry.content_root().display()
    );
    let handled = listener.run(&events, &shutdown, LISTENER_POLL);
    tracing::info!(handled, "change listener stopped");

    listener.detach();
    if let Some(server) = &server {
        server.stop();
    }
    let _ = scanner.join();
    let _ = startup.join();
    Ok(())
}
