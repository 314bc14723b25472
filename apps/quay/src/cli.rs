use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use quay_net::config::DEFAULT_CONTROL_PORT;
use quay_net::resolver::service_endpoint;
use quay_net::{
    discover, ChannelError, ControlTerminal, Endpoint, ServiceClient, ServiceConfig,
    TerminalConfig,
};
use quay_proto::CMD_INFRASTRUCTURE;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "quay")]
#[command(about = "Talk to quay controllers and worker nodes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a controller for the endpoint of a suitable worker
    Resolve {
        /// Controller address (host[:port])
        #[arg(short, long, env = "QUAY_CONTROLLER", default_value = "127.0.0.1:25900")]
        controller: String,

        /// Credential sent with the authorize frame
        #[arg(long, env = "QUAY_SIGNATURE", default_value = "")]
        signature: String,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },

    /// Invoke a service on a worker and print replies
    Call {
        /// Service URL
        url: String,

        /// Request payload as JSON
        #[arg(short, long)]
        data: Option<String>,

        /// Session identifier sent with the request
        #[arg(short, long)]
        session: Option<String>,

        /// Worker address (host[:port]); defaults to QUAY_HOST/QUAY_SERVICE_PORT
        #[arg(short, long, env = "QUAY_WORKER", conflicts_with = "controller")]
        worker: Option<String>,

        /// Discover the worker through this controller first
        #[arg(short, long)]
        controller: Option<String>,

        /// Credential for the controller
        #[arg(long, env = "QUAY_SIGNATURE", default_value = "")]
        signature: String,

        /// Event names to print (repeatable)
        #[arg(short, long = "event")]
        events: Vec<String>,

        /// Seconds to keep listening for responses and events
        #[arg(long, default_value_t = 3)]
        wait: u64,
    },

    /// Send one command to a controller and print inbound commands
    Command {
        /// Command name
        cmd: String,

        /// Command payload as JSON (defaults to {})
        #[arg(short, long)]
        data: Option<String>,

        /// Controller address (host[:port])
        #[arg(short, long, env = "QUAY_CONTROLLER", default_value = "127.0.0.1:25900")]
        controller: String,

        /// Credential sent with every command
        #[arg(long, env = "QUAY_SIGNATURE", default_value = "")]
        signature: String,

        /// Seconds to keep listening for replies
        #[arg(long, default_value_t = 3)]
        wait: u64,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Resolve {
            controller,
            signature,
            timeout,
        } => run_resolve(controller, signature, timeout).await,
        Commands::Call {
            url,
            data,
            session,
            worker,
            controller,
            signature,
            events,
            wait,
        } => {
            let config = match (worker, controller) {
                (_, Some(controller)) => {
                    let descriptor = resolve_descriptor(&controller, &signature, 5).await?;
                    ServiceConfig::from_descriptor(&descriptor).ok_or_else(|| {
                        anyhow!("controller endpoint is not host:port: {descriptor}")
                    })?
                }
                (Some(worker), None) => {
                    ServiceConfig::default().with_endpoint(service_endpoint(&worker))
                }
                (None, None) => ServiceConfig::from_env(),
            };
            let request = Request {
                url,
                data: parse_data(data)?,
                session: session.map(Value::String),
            };
            run_call(config, request, events, wait).await
        }
        Commands::Command {
            cmd,
            data,
            controller,
            signature,
            wait,
        } => {
            let data = parse_data(data)?.unwrap_or_else(|| Value::Object(Default::default()));
            run_command(&controller, signature, cmd, data, wait).await
        }
    }
}

async fn run_resolve(controller: String, signature: String, timeout: u64) -> Result<()> {
    let descriptor = resolve_descriptor(&controller, &signature, timeout).await?;
    println!("{descriptor}");
    Ok(())
}

async fn resolve_descriptor(
    controller: &str,
    signature: &str,
    timeout: u64,
) -> Result<quay_net::EndpointDescriptor> {
    let config = terminal_config(controller, signature.to_string())?;
    debug!(controller = %config.endpoint, "resolving endpoint");
    discover(config, Some(Duration::from_secs(timeout)))
        .await
        .with_context(|| format!("endpoint discovery via {controller} failed"))
}

struct Request {
    url: String,
    data: Option<Value>,
    session: Option<Value>,
}

async fn run_call(
    config: ServiceConfig,
    request: Request,
    events: Vec<String>,
    wait: u64,
) -> Result<()> {
    let (ended_tx, mut ended) = mpsc::unbounded_channel();
    let error_tx = ended_tx.clone();

    let config = config
        .on_open(move |client| {
            let Request { url, data, session } = &request;
            if let Err(err) = client.service(url, data.clone(), session.clone()) {
                warn!(error = %err, "service request not sent");
            }
        })
        .on_error(move |err| report(&error_tx, err))
        .on_close(move || {
            let _ = ended_tx.send(Ended::Closed);
        });

    let client = ServiceClient::new(config);
    client.response(|code, data, session| match session {
        Some(session) => println!("response {code} {data} session={session}"),
        None => println!("response {code} {data}"),
    });
    for name in &events {
        client.event(name, |name, data, _| println!("event {name} {data}"));
    }

    client
        .connect()
        .with_context(|| format!("failed to connect to {}", client.endpoint()))?;
    let outcome = wait_for(&mut ended, wait)
        .await
        .with_context(|| format!("worker {} failed", client.endpoint()));
    client.close();
    outcome
}

async fn run_command(
    controller: &str,
    signature: String,
    cmd: String,
    data: Value,
    wait: u64,
) -> Result<()> {
    let (ended_tx, mut ended) = mpsc::unbounded_channel();
    let error_tx = ended_tx.clone();
    let outgoing = cmd.clone();

    let config = terminal_config(controller, signature)?
        .on_open(move |terminal| {
            if let Err(err) = terminal.send_command(&outgoing, data.clone()) {
                warn!(error = %err, "command not sent");
            }
        })
        .on_error(move |err| report(&error_tx, err))
        .on_close(move || {
            let _ = ended_tx.send(Ended::Closed);
        });

    let terminal = ControlTerminal::new(config);
    terminal.infrastructure(|data| println!("{CMD_INFRASTRUCTURE} {data}"));
    terminal.command(&cmd, |name, data| println!("command {name} {data}"));

    terminal
        .connect()
        .with_context(|| format!("failed to connect to {}", terminal.endpoint()))?;
    let outcome = wait_for(&mut ended, wait)
        .await
        .with_context(|| format!("controller {} failed", terminal.endpoint()));
    terminal.close();
    outcome
}

/// How a connection ended before the listening window ran out.
#[derive(Debug)]
enum Ended {
    Closed,
    Failed(ChannelError),
}

fn report(ended: &mpsc::UnboundedSender<Ended>, err: &ChannelError) {
    eprintln!("⚠️  {err}");
    // Malformed frames leave the connection open
    if !err.is_frame() {
        let _ = ended.send(Ended::Failed(err.clone()));
    }
}

fn terminal_config(controller: &str, signature: String) -> Result<TerminalConfig> {
    let endpoint = Endpoint::parse(controller, DEFAULT_CONTROL_PORT)
        .ok_or_else(|| anyhow!("invalid controller address: {controller}"))?;
    Ok(TerminalConfig::default()
        .with_endpoint(endpoint)
        .with_signature(signature))
}

fn parse_data(data: Option<String>) -> Result<Option<Value>> {
    data.map(|text| {
        serde_json::from_str(&text).with_context(|| format!("--data is not valid JSON: {text}"))
    })
    .transpose()
}

/// Wait out the listening window, returning early if the connection ends.
/// A transport failure is an error.
async fn wait_for(ended: &mut mpsc::UnboundedReceiver<Ended>, wait: u64) -> Result<()> {
    tokio::select! {
        _ = sleep(Duration::from_secs(wait)) => Ok(()),
        outcome = ended.recv() => match outcome {
            Some(Ended::Failed(err)) => Err(err.into()),
            Some(Ended::Closed) | None => Ok(()),
        },
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            bail!("interrupted")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resolve_arguments() {
        let cli = Cli::try_parse_from([
            "quay",
            "resolve",
            "--controller",
            "10.0.0.1:26000",
            "--signature",
            "s",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve {
                controller,
                signature,
                timeout,
            } => {
                assert_eq!(controller, "10.0.0.1:26000");
                assert_eq!(signature, "s");
                assert_eq!(timeout, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn worker_and_controller_conflict() {
        let result = Cli::try_parse_from([
            "quay",
            "call",
            "echo",
            "--worker",
            "a:1",
            "--controller",
            "b:2",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn call_collects_event_names() {
        let cli = Cli::try_parse_from([
            "quay",
            "call",
            "echo",
            "-e",
            "Done",
            "--event",
            "progress",
            "--wait",
            "1",
        ])
        .unwrap();
        match cli.command {
            Commands::Call { url, events, wait, .. } => {
                assert_eq!(url, "echo");
                assert_eq!(events, vec!["Done".to_string(), "progress".into()]);
                assert_eq!(wait, 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn data_must_be_json() {
        assert_eq!(
            parse_data(Some(r#"{"x":1}"#.into())).unwrap(),
            Some(serde_json::json!({"x": 1}))
        );
        assert!(parse_data(Some("{x".into())).is_err());
        assert!(parse_data(None).unwrap().is_none());
    }

    #[tokio::test]
    async fn transport_failure_ends_wait_with_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        report(&tx, &ChannelError::Frame("malformed frame".into()));
        report(&tx, &ChannelError::Transport("connection refused".into()));
        let err = wait_for(&mut rx, 5).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn orderly_close_ends_wait_cleanly() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Ended::Closed).unwrap();
        assert!(wait_for(&mut rx, 5).await.is_ok());
    }

    #[tokio::test]
    async fn refused_worker_fails_call() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let request = Request {
            url: "echo".into(),
            data: None,
            session: None,
        };
        let result = run_call(ServiceConfig::new("127.0.0.1", port), request, Vec::new(), 5).await;
        assert!(result.is_err());
    }

    #[test]
    fn controller_address_defaults_port() {
        let config = terminal_config("controller", "sig".into()).unwrap();
        assert_eq!(config.endpoint, Endpoint::new("controller", 25900));
        assert_eq!(config.signature, "sig");
    }
}
