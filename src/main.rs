//! Purpose: `fanrelay` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs a relay node or a one-shot forward.
//! Invariants: `forward` prints its `DeliveryOutcome` as one JSON line on stdout.
//! Invariants: Errors are emitted as JSON on stderr; exit code comes from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};

mod serve;

use fanrelay::api::{
    Error, ErrorKind, Forwarder, MemoryRegistry, MemoryRooms, Options, PeerClient, Selector,
    to_exit_code,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage).with_message(err.to_string().trim().to_string()));
            }
        },
    };

    let options = cli.relay.into_options();
    match cli.command {
        Command::Serve {
            bind,
            max_body_bytes,
        } => {
            let config = serve::ServeConfig {
                bind,
                options,
                max_body_bytes,
            };
            let runtime = build_runtime()?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Forward {
            peers,
            msg,
            sparks,
            rooms,
            except,
            timeout_ms,
        } => {
            serve::init_tracing();
            let config = options.normalize()?;
            let selector = selector_from_args(sparks, rooms, except);
            let msg = parse_msg(&msg);

            let mut forwarder = Forwarder::new(config, Arc::new(MemoryRegistry::new()))
                .with_groups(Arc::new(MemoryRooms::new()));
            if let Some(timeout_ms) = timeout_ms {
                let client =
                    PeerClient::with_timeout(forwarder.config(), Duration::from_millis(timeout_ms));
                forwarder = forwarder.with_client(client);
            }

            let runtime = build_runtime()?;
            let outcome = runtime.block_on(forwarder.forward(&peers, msg, selector))?;
            let line = serde_json::to_string(&outcome).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode outcome")
                    .with_source(err)
            })?;
            println!("{line}");
            Ok(RunOutcome::ok())
        }
    }
}

#[derive(Parser)]
#[command(
    name = "fanrelay",
    version,
    about = "Deliver messages to clients connected to any node of a cluster",
    long_about = None,
    after_help = r#"EXAMPLES
  $ fanrelay serve --bind 127.0.0.1:8080
  $ curl -N 'http://127.0.0.1:8080/connect?id=alice&rooms=lobby'
  $ fanrelay forward --peer http://127.0.0.1:8080 --msg '{"text":"hi"}' --spark alice
  $ fanrelay forward --peer http://127.0.0.1:8080 --msg '"hello"' --room lobby"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(flatten)]
    relay: RelayArgs,

    #[command(subcommand)]
    command: Command,
}

/// Shared relay settings; every node of a cluster must agree on them.
#[derive(Args)]
struct RelayArgs {
    #[arg(long, global = true, env = "FANRELAY_METHOD", help = "HTTP method of relay calls (default: PUT)")]
    method: Option<String>,
    #[arg(long, global = true, env = "FANRELAY_USERNAME", help = "Basic auth username (default: omega)")]
    username: Option<String>,
    #[arg(
        long,
        global = true,
        env = "FANRELAY_PASSWORD",
        hide_env_values = true,
        help = "Basic auth password (default: supreme)"
    )]
    password: Option<String>,
    #[arg(long, global = true, env = "FANRELAY_ROUTE", help = "Relay route path (default: /primus/omega/supreme)")]
    route: Option<String>,
    #[arg(long, global = true, env = "FANRELAY_CONCURRENTLY", help = "Max in-flight peer calls (default: 20)")]
    concurrently: Option<usize>,
}

impl RelayArgs {
    fn into_options(self) -> Options {
        Options {
            method: self.method,
            username: self.username,
            password: self.password,
            url: self.route,
            concurrently: self.concurrently,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run a relay node (relay endpoint + connection host)")]
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080", help = "Address to listen on")]
        bind: SocketAddr,
        #[arg(long, default_value_t = 1024 * 1024, help = "Largest accepted relay body")]
        max_body_bytes: u64,
    },
    #[command(about = "Forward one message to peers and print the combined outcome")]
    Forward {
        #[arg(long = "peer", help = "Peer base URL (repeatable)")]
        peers: Vec<String>,
        #[arg(long, help = "Message: JSON value, or plain text when not valid JSON")]
        msg: String,
        #[arg(long = "spark", help = "Target connection id (repeatable; none = everyone)")]
        sparks: Vec<String>,
        #[arg(long = "room", help = "Target room (repeatable; overrides --spark)")]
        rooms: Vec<String>,
        #[arg(long, requires = "rooms", help = "Connection id to skip within the rooms (repeatable)")]
        except: Vec<String>,
        #[arg(long, help = "Per-peer call timeout in milliseconds")]
        timeout_ms: Option<u64>,
    },
}

fn selector_from_args(mut sparks: Vec<String>, rooms: Vec<String>, except: Vec<String>) -> Selector {
    if !rooms.is_empty() {
        return Selector::group(rooms, except);
    }
    match sparks.len() {
        0 => Selector::All,
        1 => Selector::One(sparks.remove(0)),
        _ => Selector::Many(sparks),
    }
}

fn parse_msg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn build_runtime() -> Result<tokio::runtime::Runtime, Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })
}

fn emit_error(err: &Error) {
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert(
        "message".to_string(),
        json!(err.message().unwrap_or("error")),
    );
    if let Some(url) = err.url() {
        inner.insert("url".to_string(), json!(url));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    if let Some(body) = err.body() {
        inner.insert("body".to_string(), body.clone());
    }
    if let Some(selector_type) = err.selector_type() {
        inner.insert("type".to_string(), json!(selector_type));
    }
    if let Some(packet) = err.packet() {
        inner.insert("packet".to_string(), packet.clone());
    }
    if let Some(outcome) = err.outcome() {
        inner.insert("outcome".to_string(), json!(outcome));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

#[cfg(test)]
mod tests {
    use super::{error_json, parse_msg, selector_from_args};
    use fanrelay::api::{DeliveryOutcome, Error, ErrorKind, Selector};
    use serde_json::json;

    #[test]
    fn selector_follows_flags() {
        assert_eq!(selector_from_args(vec![], vec![], vec![]), Selector::All);
        assert_eq!(
            selector_from_args(vec!["a".into()], vec![], vec![]),
            Selector::One("a".into())
        );
        assert_eq!(
            selector_from_args(vec!["a".into(), "b".into()], vec![], vec![]),
            Selector::Many(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            selector_from_args(vec!["a".into()], vec!["lobby".into()], vec!["b".into()]),
            Selector::group(["lobby"], ["b"])
        );
    }

    #[test]
    fn msg_falls_back_to_text() {
        assert_eq!(parse_msg(r#"{"a":1}"#), json!({ "a": 1 }));
        assert_eq!(parse_msg("hello there"), json!("hello there"));
    }

    #[test]
    fn error_json_carries_outcome() {
        let err = Error::new(ErrorKind::NoServers)
            .with_message("No servers provided")
            .with_outcome(DeliveryOutcome::failed(0, false));
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "NoServers");
        assert_eq!(value["error"]["outcome"], json!({ "ok": false, "send": 0, "local": false }));
    }
}
