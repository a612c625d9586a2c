use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mx_stream::{
    decode_payload, encode_message, ControlReply, ControlRequest, Hello, MessageHeader,
    MessageKind, HEADER_LEN,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(about = "Sends control requests to a running mx_engine", version)]
struct Args {
    /// Control server address (host:port).
    #[arg(long, default_value = "127.0.0.1:35367")]
    addr: String,

    /// Seconds to wait for each reply.
    #[arg(long, default_value_t = 10.0)]
    timeout: f64,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Compile and queue script text (joined with spaces) or a script file.
    Run {
        #[arg(long, value_hint = clap::ValueHint::FilePath, conflicts_with = "statement")]
        file: Option<PathBuf>,
        statement: Vec<String>,
    },
    Pause,
    Resume,
    Stop,
    /// Print the executor state as JSON.
    State,
    /// Keep the engine alive after its script ends (`true`) or release it.
    KeepOpen {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Debug, Error)]
enum RemoteError {
    #[error("engine rejected the request: {0}")]
    Rejected(String),
    #[error("expected a {expected:?} message, got {found:?}")]
    UnexpectedKind {
        expected: MessageKind,
        found: MessageKind,
    },
    #[error("nothing to send")]
    EmptyStatement,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let request = build_request(args.action)?;
    let timeout = Duration::from_secs_f64(args.timeout.max(0.0).min(86_400.0));
    let reply = tokio::time::timeout(timeout, exchange(&args.addr, &request))
        .await
        .with_context(|| format!("no reply from {} within {timeout:?}", args.addr))??;

    match reply {
        ControlReply::Ack => {
            println!("ok");
            Ok(())
        }
        ControlReply::State(state) => {
            let json = serde_json::to_string_pretty(&state).context("formatting state")?;
            println!("{json}");
            Ok(())
        }
        ControlReply::Rejected { error } => Err(RemoteError::Rejected(error).into()),
    }
}

fn build_request(action: Action) -> Result<ControlRequest> {
    Ok(match action {
        Action::Run { file, statement } => {
            let source = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => statement.join(" "),
            };
            if source.trim().is_empty() {
                return Err(RemoteError::EmptyStatement.into());
            }
            ControlRequest::RunStatement { source }
        }
        Action::Pause => ControlRequest::Pause,
        Action::Resume => ControlRequest::Resume,
        Action::Stop => ControlRequest::Stop,
        Action::State => ControlRequest::QueryState,
        Action::KeepOpen { enabled } => ControlRequest::KeepOpen { enabled },
    })
}

async fn exchange(addr: &str, request: &ControlRequest) -> Result<ControlReply> {
    let mut socket = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    socket.set_nodelay(true)?;

    let (kind, payload) = read_message(&mut socket).await?;
    expect_kind(MessageKind::Hello, kind)?;
    let hello: Hello = decode_payload(&payload)?;
    eprintln!(
        "[mx_remote] connected to {} ({})",
        hello.producer,
        hello.build.as_deref().unwrap_or("unknown build")
    );

    send_message(&mut socket, MessageKind::Request, request).await?;
    let (kind, payload) = read_message(&mut socket).await?;
    expect_kind(MessageKind::Reply, kind)?;
    Ok(decode_payload(&payload)?)
}

async fn send_message<W, T>(writer: &mut W, kind: MessageKind, payload: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let bytes = encode_message(kind, payload)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_message<R>(reader: &mut R) -> Result<(MessageKind, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .context("reading message header")?;
    let header = MessageHeader::decode(&header)?;
    let mut payload = vec![0u8; header.length as usize];
    reader
        .read_exact(&mut payload)
        .await
        .context("reading message payload")?;
    Ok((header.kind, payload))
}

fn expect_kind(expected: MessageKind, found: MessageKind) -> Result<(), RemoteError> {
    if expected == found {
        Ok(())
    } else {
        Err(RemoteError::UnexpectedKind { expected, found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_words_are_joined() -> Result<()> {
        let args = Args::try_parse_from(["mx_remote", "run", "m", "=", "uniform(0,", "1,", "0)"])?;
        match build_request(args.action)? {
            ControlRequest::RunStatement { source } => assert_eq!(source, "m = uniform(0, 1, 0)"),
            other => panic!("unexpected request {other:?}"),
        }
        assert!(build_request(Action::Run {
            file: None,
            statement: Vec::new()
        })
        .is_err());
        Ok(())
    }

    #[test]
    fn keep_open_takes_an_explicit_flag() -> Result<()> {
        let args = Args::try_parse_from(["mx_remote", "keep-open", "false"])?;
        assert_eq!(
            build_request(args.action)?,
            ControlRequest::KeepOpen { enabled: false }
        );
        Ok(())
    }

    #[tokio::test]
    async fn frames_round_trip_over_a_stream() -> Result<()> {
        let (mut client, mut server) = tokio::io::duplex(1024);
        send_message(&mut server, MessageKind::Reply, &ControlReply::Ack).await?;
        let (kind, payload) = read_message(&mut client).await?;
        assert_eq!(kind, MessageKind::Reply);
        assert!(matches!(
            decode_payload::<ControlReply>(&payload)?,
            ControlReply::Ack
        ));
        Ok(())
    }
}
