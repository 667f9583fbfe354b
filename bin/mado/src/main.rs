mod config;
mod output;

use std::{path::PathBuf, str::FromStr};

use anyhow::bail;
use clap::Parser;
use config::Config;
use fake_user_agent::get_chrome_rua;
use mado::{CancellationToken, HttpClient, HttpManifestSource, HttpProber, Validator};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, ClientBuilder,
};
use url::Url;

/// Validates the segment availability windows of a live MPEG-DASH stream
#[derive(Parser, Debug, Clone)]
#[clap(name = "mado", version)]
pub struct MadoArgs {
    /// URL of the live MPD
    url: Url,

    /// TOML configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Scheduler tick in milliseconds
    #[clap(long)]
    tick: Option<u64>,

    /// Already available segments validated per representation when joining
    #[clap(long)]
    past_segments: Option<u64>,

    /// Issue end checks this many milliseconds before the availability end
    #[clap(long)]
    end_check_lead: Option<u64>,

    /// Do not correct the local clock by the observed server clock skew
    #[clap(long)]
    no_skew_correction: bool,

    /// Cookies used for the manifest and every segment
    #[clap(long = "cookie")]
    cookies: Vec<String>,

    /// HTTP Header used for every request
    ///
    /// Custom header. eg. "User-Agent: xxxxx".
    #[clap(short = 'H', long)]
    headers: Vec<String>,

    /// Print reports as JSON lines
    #[clap(long)]
    json: bool,
}

impl MadoArgs {
    fn apply(&self, config: &mut Config) {
        let validator = &mut config.validator;
        if let Some(tick) = self.tick {
            validator.tick_interval_ms = tick;
        }
        if let Some(past_segments) = self.past_segments {
            validator.max_retained_past_segments = past_segments;
        }
        if let Some(lead) = self.end_check_lead {
            validator.end_check_lead_ms = lead;
        }
        if self.no_skew_correction {
            validator.clock_skew_correction = false;
        }

        config.http.cookies.extend(self.cookies.iter().cloned());
        config.http.headers.extend(self.headers.iter().cloned());
    }
}

fn client_builder(config: &config::HttpConfig) -> anyhow::Result<ClientBuilder> {
    let mut headers = HeaderMap::new();
    for header in &config.headers {
        let Some((key, value)) = header.split_once(':') else {
            bail!("Invalid header: {header}");
        };
        headers.insert(
            HeaderName::from_str(key.trim())?,
            HeaderValue::from_str(value.trim())?,
        );
    }

    let user_agent = config
        .user_agent
        .clone()
        .unwrap_or_else(|| get_chrome_rua().to_string());
    Ok(Client::builder()
        .default_headers(headers)
        .user_agent(user_agent))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = MadoArgs::parse();
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    let client = HttpClient::new(client_builder(&config.http)?)?;
    client.add_cookies(config.http.cookies.clone(), &args.url);

    let source = HttpManifestSource::new(client.clone(), args.url.clone());
    let prober = HttpProber::new(client);
    let (validator, mut reports) = Validator::new(source, prober, config.validator);

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, stopping validation");
            cancel.cancel();
        }
    });

    let json = args.json;
    let reporter = tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            if let Err(e) = output::print_report(&report, json) {
                tracing::error!("Failed to print report: {e}");
            }
        }
    });

    let result = validator.run(token).await;
    // the validator is gone, the reporter drains what is left and stops
    reporter.await?;

    let progress = result?;
    output::print_progress(&progress, json)?;
    Ok(())
}
