//! atalk-memo - AppleTalk transaction responder.
//!
//! This is the main binary entry point. See the `atalk_memo` library for the
//! protocol and server code.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use atalk_memo::constants::{
    DEFAULT_NBP_NAME, DEFAULT_STANDARD_RESPONSE, DEFAULT_TWITTER_PARAMS_FILE,
    DEFAULT_TWITTER_TOKEN_FILE,
};
use atalk_memo::atp::packet::check_response_len;
use atalk_memo::server::Response;
use atalk_memo::{AtpEndpoint, Config, Interrupt, NbpDirectory, Service, ServiceName, Sink, TwitterSink};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "atalk-memo")]
#[command(about = "Answers AppleTalk transactions and optionally tweets them", long_about = None)]
struct Cli {
    /// Name to register for NBP (Object:Type@Zone)
    #[arg(long, alias = "nbp_name", default_value = DEFAULT_NBP_NAME)]
    nbp_name: String,

    /// Text sent back to every request
    #[arg(long, alias = "standard_response", default_value = DEFAULT_STANDARD_RESPONSE)]
    standard_response: String,

    /// Tweet the text of every request
    #[arg(long, alias = "enable_tweeting")]
    enable_tweeting: bool,

    /// Twitter consumer key & secret (JSON)
    #[arg(long, alias = "twitter_params", default_value = DEFAULT_TWITTER_PARAMS_FILE)]
    twitter_params: PathBuf,

    /// Twitter user token (JSON), created on first authorization
    #[arg(long, alias = "twitter_token", default_value = DEFAULT_TWITTER_TOKEN_FILE)]
    twitter_token: PathBuf,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let mut config = Config {
            nbp_name: cli.nbp_name,
            standard_response: cli.standard_response,
            enable_tweeting: cli.enable_tweeting,
            twitter_params: cli.twitter_params,
            twitter_token: cli.twitter_token,
            ..Config::default()
        };
        config.apply_env_overrides();
        config
    }
}

fn init_logging() {
    let builder_env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(builder_env);
    builder.format_timestamp_secs();

    // ATALK_MEMO_LOG_FILE sends logs to a file instead of stderr
    if let Ok(path) = std::env::var("ATALK_MEMO_LOG_FILE") {
        match std::fs::File::create(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {path}: {e}; logging to stderr"),
        }
    }
    builder.init();
}

/// Reject settings that would fail every transaction.
fn validate(config: &Config) -> Result<()> {
    let response = Response::standard(&config.standard_response);
    check_response_len(response.payload().len()).context("standard response does not fit one ATP packet")
}

fn run(config: Config) -> Result<()> {
    validate(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let sink: Option<Arc<dyn Sink>> = if config.enable_tweeting {
        let sink = runtime.block_on(TwitterSink::connect(&config))?;
        Some(Arc::new(sink))
    } else {
        None
    };

    let interrupt = Interrupt::install()?;
    let name = ServiceName::resolve(&config.nbp_name)?;

    // AsyncFd registration needs the runtime's reactor
    let endpoint = {
        let _guard = runtime.enter();
        AtpEndpoint::open()?
    };

    Service::new(name, endpoint, NbpDirectory::new(), config.standard_response, sink)
        .run(runtime.handle(), interrupt)
}

fn main() {
    init_logging();

    let cli = Cli::parse();
    if let Err(e) = run(Config::from(cli)) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}
