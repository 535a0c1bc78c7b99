use std::path::PathBuf;

use clap::Parser;
use keyward_clock::{Clock, DurationSecs, System};
use keyward_reqwest::{ApiClient, ApiRequest, PipelineConfig};
use keyward_tokens::{backends::FileBackend, AccessToken, CredentialPair, RefreshToken};

#[derive(Debug, Parser)]
struct Opts {
    /// The base URL of the API
    #[clap(short, long, env, default_value = "http://localhost:8080")]
    base_url: String,

    /// The local file used to persist credentials
    #[clap(short = 'f', long, env, default_value = ".credentials.json")]
    credentials_file: PathBuf,

    /// An access credential to start a session with
    #[clap(long, env, requires = "refresh_token")]
    access_token: Option<String>,

    /// A refresh credential to start a session with
    #[clap(long, env, requires = "access_token")]
    refresh_token: Option<String>,

    /// Do not report request failures to the error handler
    #[clap(short, long)]
    silent: bool,

    /// The path to fetch, relative to the base URL
    path: String,
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

    let client = ApiClient::builder(PipelineConfig::new(opts.base_url))
        .with_backend(FileBackend::new(opts.credentials_file))
        .on_unauthenticated(|reason| tracing::warn!(%reason, "sign in again"))
        .on_error(|error| tracing::error!(%error, "request failed"))
        .build()?;

    let outcome = client.initialize().await?;
    tracing::info!(
        loaded = outcome.loaded,
        refresh_was_expired = outcome.refresh_was_expired,
        "initialized session"
    );

    if let (Some(access), Some(refresh)) = (opts.access_token, opts.refresh_token) {
        client
            .login(CredentialPair::issued_at(
                AccessToken::new(access),
                RefreshToken::new(refresh),
                System.now(),
                DurationSecs::from_minutes(30),
                DurationSecs::from_minutes(60 * 24),
            ))
            .await?;
    }

    let mut request = ApiRequest::get(opts.path);
    if opts.silent {
        request = request.silent();
    }

    let body: serde_json::Value = client.send(request).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    Ok(())
}
