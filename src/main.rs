use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use sqlx::postgres::PgPoolOptions;

use logpump::ingest::{self, upload::field_specs, DEFAULT_BATCH_SIZE};
use logpump::record::w3c::W3cReader;
use logpump::record::RecordSource;
use logpump::sink::elastic::{EsClient, EsConfig, EsSinkProvider};
use logpump::sink::mapping::{index_options, IndexSettings};
use logpump::sink::postgres::PgSinkProvider;

#[derive(Parser, Debug)]
#[command(
    name = "logpump",
    about = "Bulk-load parsed access log files into PostgreSQL or Elasticsearch"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse access log files and bulk-copy events into PostgreSQL.
    PushPg(PushPgArgs),
    /// Parse access log files and bulk-index events into Elasticsearch.
    PushEs(PushEsArgs),
    /// Create an Elasticsearch index with settings and field mappings
    /// derived from a sample file's header.
    CreateIndex(CreateIndexArgs),
}

#[derive(Args, Debug)]
struct PushPgArgs {
    /// URI of the PostgreSQL server to connect to.
    #[arg(long)]
    uri: String,

    /// Name of the table to push events to.
    #[arg(long, default_value = "accesslogs")]
    tablename: String,

    /// Number of parallel injectors.
    #[arg(long, default_value_t = 1)]
    parallel: u32,

    /// Batch size for each bulk COPY.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batchsize: usize,

    /// The files to parse.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct PushEsArgs {
    /// Elasticsearch connection URL.
    #[arg(long, default_value = "http://127.0.0.1:9200")]
    url: String,

    /// Name of the index to push events to.
    #[arg(long, default_value = "accesslogs")]
    index: String,

    /// Username for HTTP basic auth.
    #[arg(long)]
    username: Option<String>,

    /// Password for HTTP basic auth.
    #[arg(long)]
    password: Option<String>,

    /// Number of parallel injectors.
    #[arg(long, default_value_t = 1)]
    parallel: u32,

    /// The files to parse.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct CreateIndexArgs {
    /// Elasticsearch connection URL.
    #[arg(long, default_value = "http://127.0.0.1:9200")]
    url: String,

    /// Name of the index to create.
    #[arg(long, default_value = "accesslogs")]
    index: String,

    /// Username for HTTP basic auth.
    #[arg(long)]
    username: Option<String>,

    /// Password for HTTP basic auth.
    #[arg(long)]
    password: Option<String>,

    /// Number of primary shards.
    #[arg(long, default_value_t = 1)]
    shards: u32,

    /// Number of replicas.
    #[arg(long, default_value_t = 0)]
    replicas: u32,

    /// Verify shards on startup.
    #[arg(long)]
    check_on_startup: bool,

    /// Refresh interval in seconds.
    #[arg(long, default_value_t = 10)]
    refresh_interval: u64,

    /// Field names to leave out of the mapping (case insensitive).
    #[arg(long)]
    exclude: Vec<String>,

    /// Sample log file whose header supplies the field names.
    sample: PathBuf,
}

fn fatal(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::PushPg(args) => push_pg(args).await,
        Command::PushEs(args) => push_es(args).await,
        Command::CreateIndex(args) => create_index(args).await,
    }
}

async fn push_pg(args: PushPgArgs) {
    let uri = args.uri.trim();
    if uri.is_empty() {
        fatal("empty uri");
    }
    let parallel = if args.parallel == 0 { 1 } else { args.parallel };
    let batchsize = if args.batchsize == 0 {
        DEFAULT_BATCH_SIZE
    } else {
        args.batchsize
    };

    let pool = match PgPoolOptions::new()
        .max_connections(parallel)
        .connect(uri)
        .await
    {
        Ok(pool) => pool,
        Err(err) => fatal(err),
    };

    let provider = Arc::new(PgSinkProvider::new(pool, args.tablename));
    let summary = ingest::run(provider, args.files, parallel as usize, batchsize).await;
    log::info!(
        "run complete: {} files uploaded, {} failed, {} lines total",
        summary.succeeded,
        summary.failed,
        summary.lines
    );
}

async fn push_es(args: PushEsArgs) {
    let url = args.url.trim().to_string();
    if url.is_empty() {
        fatal("empty url");
    }
    let parallel = if args.parallel == 0 { 1 } else { args.parallel };

    let client = match EsClient::new(EsConfig {
        url,
        username: args.username,
        password: args.password,
    }) {
        Ok(client) => client,
        Err(err) => fatal(err),
    };

    match client.server_version().await {
        Ok(version) => println!("Elasticsearch version: {version}"),
        Err(err) => fatal(err),
    }

    let provider = Arc::new(EsSinkProvider::new(client, args.index));
    let summary =
        ingest::run(provider, args.files, parallel as usize, DEFAULT_BATCH_SIZE).await;
    log::info!(
        "run complete: {} files uploaded, {} failed, {} lines total",
        summary.succeeded,
        summary.failed,
        summary.lines
    );
}

async fn create_index(args: CreateIndexArgs) {
    let client = match EsClient::new(EsConfig {
        url: args.url.trim().to_string(),
        username: args.username,
        password: args.password,
    }) {
        Ok(client) => client,
        Err(err) => fatal(err),
    };

    // The mapping covers the columns documents will carry, minus the
    // synthetic id (identity plumbing, not a searchable field).
    let file = match File::open(&args.sample) {
        Ok(file) => file,
        Err(err) => fatal(format!("cannot open '{}': {err}", args.sample.display())),
    };
    let mut reader = W3cReader::new(BufReader::new(file));
    let header = match reader.header() {
        Ok(header) => header,
        Err(err) => fatal(err),
    };
    let names: Vec<String> = field_specs(&header)
        .into_iter()
        .skip(1)
        .map(|spec| spec.name)
        .collect();

    let excludes: HashSet<String> = args
        .exclude
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();
    let settings = IndexSettings {
        shards: args.shards,
        replicas: args.replicas,
        check_on_startup: args.check_on_startup,
        refresh_interval: Duration::from_secs(args.refresh_interval),
    };
    let options = index_options(&names, &excludes, &settings);

    if let Err(err) = client.create_index(&args.index, &options).await {
        fatal(err);
    }
    println!("created index {}", args.index);
}
