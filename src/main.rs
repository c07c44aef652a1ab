mod cli;
mod error;

use crate::cli::{Cli, Command, PackagesArgs, SyncArgs};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use pkgmirror_config::Config;
use pkgmirror_fetch::CancellationToken;
use pkgmirror_kv::{Database, KeyValue};
use pkgmirror_mirror::{CallerScope, MetadataSource, Mirror, SyncFlags};
use pkgmirror_storage::BackendHandle;
use pkgmirror_storage::backend::LocalBackend;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

struct App {
    config: Config,
    backend: Arc<LocalBackend>,
    db: Database,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
        let backend = LocalBackend::new("storage", &config.storage)
            .or_raise(|| ErrorKind::Storage(config.storage.display().to_string()))?;
        let database = config.database.path.display().to_string();
        if let Some(parent) = config.database.path.parent() {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Database(database.clone()))?;
        }
        let db = Database::connect(&config.database)
            .await
            .or_raise(|| ErrorKind::Database(database))?;
        Ok(Self {
            config,
            backend: Arc::new(backend),
            db,
        })
    }

    fn mirror(&self, name: &str) -> Result<Mirror> {
        let backend: BackendHandle = self.backend.clone();
        Mirror::from_config(&self.config, name, backend, KeyValue::from(&self.db))
            .or_raise(|| ErrorKind::Mirror(name.to_string()))
    }
}

fn init_tracing(log_level: &str) {
    let log_level: tracing::Level = log_level.parse().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(stderr_layer).init();
}

fn print(bytes: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes).or_raise(|| ErrorKind::Output)?;
    stdout.write_all(b"\n").or_raise(|| ErrorKind::Output)
}

/// Cancel `token` on Ctrl-C so a running sync stops issuing requests.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight requests");
            token.cancel();
        }
    });
}

async fn sync(app: &App, args: SyncArgs) -> Result<()> {
    let names: Vec<String> = match args.mirror {
        Some(name) => vec![name],
        None => app.config.mirrors.keys().cloned().collect(),
    };
    let flags = SyncFlags {
        full_reset: args.reset,
        ui_triggered: args.force,
    };
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut failed = None;
    for name in names {
        let mirror = app.mirror(&name)?;
        let orchestrator = mirror.sync_with_progress(cancel.clone(), |progress| {
            debug!(completed = progress.completed, total = progress.total, "sync progress");
        });
        match orchestrator.run(flags).await {
            Ok(stats) => info!(mirror = %name, total = stats.pkg_total, updated = stats.pkg_updated, "synced"),
            Err(err) if cancel.is_cancelled() => return Err(err.raise(ErrorKind::Mirror(name))),
            Err(err) => {
                error!(mirror = %name, error = ?err, "sync failed");
                failed = Some(err.raise(ErrorKind::Mirror(name)));
            },
        }
    }
    failed.map_or(Ok(()), Err)
}

async fn approvals(app: &App, args: PackagesArgs, approve: bool) -> Result<()> {
    let mirror = app.mirror(&args.mirror)?;
    let result = if approve {
        mirror.approvals().mark_approve(&args.packages).await
    } else {
        mirror.approvals().remove_approve(&args.packages).await
    };
    result.or_raise(|| ErrorKind::Mirror(args.mirror.clone()))?;
    info!(mirror = %args.mirror, packages = args.packages.len(), approve, "updated approvals");
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::open(&cli).await?;
    let result = match cli.command {
        Command::Sync(args) => sync(&app, args).await,
        Command::Approve(args) => approvals(&app, args, true).await,
        Command::Unapprove(args) => approvals(&app, args, false).await,
        Command::Enabled { mirror, approved } => {
            let handle = app.mirror(&mirror)?;
            let packages = if approved {
                handle.approvals().approved().await
            } else {
                handle.approvals().enabled().await
            }
            .or_raise(|| ErrorKind::Mirror(mirror))?;
            packages.iter().try_for_each(|package| print(package.as_bytes()))
        },
        Command::Show {
            mirror,
            package,
            restricted,
        } => {
            let scope = if restricted { CallerScope::Restricted } else { CallerScope::Full };
            let facade = app.mirror(&mirror)?.facade(scope);
            let record = match package {
                Some(package) => facade.find_package_metadata(&package, None).await,
                None => facade.root_metadata().await,
            }
            .or_raise(|| ErrorKind::Mirror(mirror.clone()))?;
            let content = record.decode().or_raise(|| ErrorKind::Mirror(mirror))?;
            print(&content)
        },
        Command::Dist {
            mirror,
            package,
            version,
            reference,
        } => {
            let resolver = app.mirror(&mirror)?.dist().await.or_raise(|| ErrorKind::Mirror(mirror.clone()))?;
            let path = resolver
                .dist_path(&package, &version, &reference)
                .await
                .or_raise(|| ErrorKind::Mirror(mirror.clone()))?;
            let absolute = app.backend.absolute_path(&path).or_raise(|| ErrorKind::Mirror(mirror))?;
            print(absolute.display().to_string().as_bytes())
        },
        Command::Stats { mirror } => {
            let stats = app.mirror(&mirror)?.stats().load().await.or_raise(|| ErrorKind::Mirror(mirror))?;
            print(&serde_json::to_vec_pretty(&stats).or_raise(|| ErrorKind::Output)?)
        },
        Command::Mirrors => app
            .config
            .mirrors
            .iter()
            .try_for_each(|(name, mirror)| print(format!("{name}\t{}", mirror.url).as_bytes())),
    };
    app.db.close().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}
