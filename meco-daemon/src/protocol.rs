use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use meco_core::{Outcome, ResourceDescriptor};

use crate::error::{io_err, DaemonError};
use crate::paths::MecoConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// JSON newline-delimited request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MecoRequest {
    Echo { message: String },
    Start(ResourceDescriptor),
}

/// Reply to [`MecoRequest::Echo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoReply {
    pub message: String,
}

/// JSON newline-delimited response.
///
/// `Start` and undecodable requests get an [`Outcome`]; `Echo` gets an
/// [`EchoReply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MecoResponse {
    Outcome(Outcome),
    Echo(EchoReply),
}

pub fn echo_message(message: &str) -> String {
    format!("Hello from M-E-C-O! You said: {message}")
}

/// Send one JSON request to the service and return one response.
pub fn send_request(config: &MecoConfig, request: &MecoRequest) -> Result<MecoResponse, DaemonError> {
    let addr = config.addr;
    let label = addr.to_string();

    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::TimedOut
        ) {
            DaemonError::ServiceNotRunning { addr }
        } else {
            io_err(&label, err)
        }
    })?;
    stream
        .set_read_timeout(Some(RESPONSE_TIMEOUT))
        .map_err(|e| io_err(&label, e))?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&label, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&label, e))?;
    stream.flush().map_err(|e| io_err(&label, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(|e| io_err(&label, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "service closed connection before responding".to_string(),
        ));
    }

    let response: MecoResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

pub fn request_echo(config: &MecoConfig, message: &str) -> Result<String, DaemonError> {
    let request = MecoRequest::Echo {
        message: message.to_string(),
    };
    match send_request(config, &request)? {
        MecoResponse::Echo(reply) => Ok(reply.message),
        MecoResponse::Outcome(outcome) => Err(DaemonError::Protocol(outcome.message)),
    }
}

pub fn request_start(
    config: &MecoConfig,
    descriptor: ResourceDescriptor,
) -> Result<Outcome, DaemonError> {
    match send_request(config, &MecoRequest::Start(descriptor))? {
        MecoResponse::Outcome(outcome) => Ok(outcome),
        MecoResponse::Echo(_) => Err(DaemonError::Protocol(
            "service answered Start with an echo reply".to_string(),
        )),
    }
}
