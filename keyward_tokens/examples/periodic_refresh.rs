use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use clap::Parser;
use keyward_clock::{Clock, DurationSecs, System};
use keyward_tokens::{
    backends::FileBackend, renewer_fn, AccessToken, CredentialPair, CredentialStore,
    ExpiryEvaluator, ProactiveScheduler, RefreshCoordinator, RefreshToken, RenewerError,
    SchedulerConfig,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The local file used to persist credentials
    #[clap(short = 'f', long, env, default_value = ".credentials.json")]
    credentials_file: PathBuf,

    /// Lifetime of each issued access credential, in seconds
    #[clap(short, long, env, default_value_t = 20)]
    access_lifetime: u64,

    /// How often to check for expiring credentials, in seconds
    #[clap(short, long, env, default_value_t = 5)]
    interval: u64,

    /// How long before expiry to renew, in seconds
    #[clap(short, long, env, default_value_t = 10)]
    threshold: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let access_lifetime = DurationSecs(opts.access_lifetime);

    let store = Arc::new(CredentialStore::new(FileBackend::new(
        opts.credentials_file.clone(),
    )));
    let outcome = store.initialize().await?;
    tracing::info!(
        loaded = outcome.loaded,
        refresh_was_expired = outcome.refresh_was_expired,
        file = %opts.credentials_file.display(),
        "initialized credential store"
    );

    if !outcome.loaded {
        store
            .set(CredentialPair::issued_at(
                AccessToken::from_static("access-0"),
                RefreshToken::from_static("demo-refresh"),
                System.now(),
                access_lifetime,
                DurationSecs::from_minutes(60),
            ))
            .await?;
    }

    let issued = Arc::new(AtomicU64::new(0));
    let renewer = renewer_fn(move |refresh: RefreshToken| {
        let issued = Arc::clone(&issued);
        async move {
            let n = issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, RenewerError>(CredentialPair::issued_at(
                AccessToken::new(format!("access-{}", n)),
                refresh,
                System.now(),
                access_lifetime,
                DurationSecs::from_minutes(60),
            ))
        }
    });

    let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), renewer));
    let evaluator = Arc::new(ExpiryEvaluator::new(store.clone()));
    let _scheduler = ProactiveScheduler::spawn(
        coordinator,
        evaluator,
        SchedulerConfig::new(
            Duration::from_secs(opts.interval),
            DurationSecs(opts.threshold),
        ),
    );

    let mut states = store.subscribe();
    let mut ticker = time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(pair) = store.get().pair() {
                    tracing::info!(
                        token = format_args!("{:#?}", pair.access_token()),
                        expires_at = pair.access_expires_at().map(|t| t.0),
                        "current access credential"
                    );
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                tracing::info!(present = states.borrow().is_present(), "credentials changed");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
