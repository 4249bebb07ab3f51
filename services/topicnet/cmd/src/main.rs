//! topicnet node binary.
//!
//! Generates key pairs, publishes JSON values on a topic, or subscribes to a
//! topic and logs what arrives, in standalone or managed discovery mode.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use topicnet_session::{
    Endpoint, ErrorCode, KeyPair, Publisher, SchemaSource, SessionConfig, TextFormat,
    TextSubscriber, TextSubscriberCallback, TopicDescriptor,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod logging;

use logging::TopicnetLogFormatter;

/// Topic-addressed publish/subscribe node
#[derive(Parser, Debug)]
#[command(name = "topicnet", version, about = "Topic-addressed publish/subscribe node")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Registry config file; enables managed mode
    #[arg(long, global = true)]
    registry_config: Option<PathBuf>,

    /// Host advertised in standalone mode
    #[arg(long, default_value = "127.0.0.1", global = true)]
    host: String,

    /// TNS file for standalone mode name lookups
    #[arg(long, global = true)]
    tns_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a new key pair
    Keygen,

    /// Publish JSON values on a topic
    Publish {
        /// Topic name
        #[arg(long)]
        topic: String,

        /// Schema file for the topic
        #[arg(long)]
        schema: PathBuf,

        /// Port to listen on
        #[arg(long, default_value = "5562")]
        port: u16,

        /// JSON value to publish (repeatable; cycled in order)
        #[arg(long = "value", required = true)]
        values: Vec<String>,

        /// Delay between messages, e.g. 1s
        #[arg(long, default_value = "1s")]
        interval: humantime::Duration,

        /// Stop after this many messages
        #[arg(long)]
        count: Option<u64>,

        /// Publisher public key; with --secret-key makes the topic secured
        #[arg(long, requires = "secret_key")]
        public_key: Option<String>,

        /// Publisher secret key
        #[arg(long, requires = "public_key")]
        secret_key: Option<String>,
    },

    /// Subscribe to a topic and log every message
    Subscribe {
        /// Topic name
        #[arg(long)]
        topic: String,

        /// Schema files to register (repeatable)
        #[arg(long)]
        schema: Vec<PathBuf>,

        /// Publisher endpoint (host:port); resolved through the TNS when absent
        #[arg(long, requires = "schema_id")]
        endpoint: Option<String>,

        /// Schema id of the topic when --endpoint is given
        #[arg(long)]
        schema_id: Option<String>,

        /// Publisher public key; makes the subscription secured
        #[arg(long)]
        server_key: Option<String>,

        /// Own public key (generated when absent)
        #[arg(long, requires = "secret_key")]
        public_key: Option<String>,

        /// Own secret key
        #[arg(long, requires = "public_key")]
        secret_key: Option<String>,

        /// How received payloads are printed
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    PrettyJson,
    Yaml,
}

impl From<OutputFormat> for TextFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => TextFormat::Json,
            OutputFormat::PrettyJson => TextFormat::PrettyJson,
            OutputFormat::Yaml => TextFormat::Yaml,
        }
    }
}

/// Logs each delivery
struct LogCallback;

impl TextSubscriberCallback for LogCallback {
    fn on_message(&self, topic: &str, data: String) {
        component_info!("subscriber", "[{}] {}", topic, data.trim_end());
    }

    fn on_error(&self, topic: &str, code: ErrorCode) {
        component_warn!("subscriber", "[{}] message dropped: {}", topic, code);
    }
}

fn key_pair(public_key: Option<&str>, secret_key: Option<&str>) -> anyhow::Result<Option<KeyPair>> {
    match (public_key, secret_key) {
        (Some(public_key), Some(secret_key)) => Ok(Some(KeyPair::new(public_key, secret_key)?)),
        _ => Ok(None),
    }
}

async fn start_mode(args: &Args, config: &SessionConfig) -> anyhow::Result<()> {
    match &args.registry_config {
        Some(path) => config
            .start_managed_mode(path)
            .await
            .with_context(|| format!("starting managed mode from {:?}", path))?,
        None => config
            .start_standalone_mode(&args.host, args.tns_file.is_some(), args.tns_file.as_deref())
            .await
            .context("starting standalone mode")?,
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("topicnet={}", args.log_level).parse()?)
        .add_directive(format!("topicnet_session={}", args.log_level).parse()?)
        .add_directive(format!("topicnet_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(TopicnetLogFormatter::new("topicnet"))
        .init();

    if let Command::Keygen = args.command {
        let keys = KeyPair::generate();
        println!("public: {}", keys.public_key());
        println!("secret: {}", keys.secret_key());
        return Ok(());
    }

    info!("Starting topicnet v{}", env!("CARGO_PKG_VERSION"));
    let config = SessionConfig::new()?;
    start_mode(&args, &config).await?;

    let result = match &args.command {
        Command::Keygen => Ok(()),
        Command::Publish {
            topic,
            schema,
            port,
            values,
            interval,
            count,
            public_key,
            secret_key,
        } => {
            let values = values
                .iter()
                .map(|v| serde_json::from_str::<Value>(v).with_context(|| format!("parsing --value {}", v)))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let source = SchemaSource::File(schema.clone());

            let publisher = match key_pair(public_key.as_deref(), secret_key.as_deref())? {
                Some(keys) => Publisher::create_secured(&config, topic, source, *port, &keys).await?,
                None => Publisher::create(&config, topic, source, *port).await?,
            };
            component_info!("publisher", "Publishing {} on {}", topic, publisher.topic().endpoint());

            run_publisher(&publisher, &values, (*interval).into(), *count).await;
            publisher.terminate().await;
            Ok(())
        }
        Command::Subscribe {
            topic,
            schema,
            endpoint,
            schema_id,
            server_key,
            public_key,
            secret_key,
            format,
        } => {
            config.add_schema(schema.as_slice()).await?;
            let format = TextFormat::from(*format);
            let callback: Arc<dyn TextSubscriberCallback> = Arc::new(LogCallback);
            let own_keys = match key_pair(public_key.as_deref(), secret_key.as_deref())? {
                Some(keys) => keys,
                None => KeyPair::generate(),
            };

            let subscriber = match (endpoint, schema_id) {
                (Some(endpoint), Some(schema_id)) => {
                    let endpoint: Endpoint = endpoint.parse()?;
                    let descriptor =
                        TopicDescriptor::new(topic, schema_id, server_key.is_some(), endpoint)?;
                    match server_key {
                        Some(server_key) => {
                            TextSubscriber::subscribe_secured(
                                &config, descriptor, server_key, &own_keys, format, callback,
                            )
                            .await?
                        }
                        None => TextSubscriber::subscribe(&config, descriptor, format, callback).await?,
                    }
                }
                _ => {
                    if let Some(server_key) = server_key {
                        config.keys().set_own_keys(own_keys);
                        config.keys().set_server_key(topic, server_key)?;
                    }
                    TextSubscriber::by_name(&config, topic, server_key.is_some(), format, callback)
                        .await?
                }
            };
            component_info!(
                "subscriber",
                "Subscribed to {} topic(s){}",
                subscriber.topics().len(),
                if subscriber.is_secured() { " (secured)" } else { "" }
            );

            tokio::signal::ctrl_c().await?;
            subscriber.terminate().await;
            Ok(())
        }
    };

    if let Err(e) = &result {
        component_error!("main", "{:#}", e);
    }
    config.reset().await;
    info!("topicnet stopped");
    result
}

/// Publish `values` in a loop until Ctrl-C or `count` messages
async fn run_publisher(
    publisher: &Publisher,
    values: &[Value],
    interval: std::time::Duration,
    count: Option<u64>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut sent: u64 = 0;

    loop {
        if count.is_some_and(|limit| sent >= limit) {
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted after {} message(s)", sent);
                break;
            }
            _ = ticker.tick() => {
                let value = &values[(sent % values.len() as u64) as usize];
                match publisher.publish(value).await {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        component_warn!("publisher", "Publish failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    component_info!("publisher", "Sent {} message(s)", sent);
}
