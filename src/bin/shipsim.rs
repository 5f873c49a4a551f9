use clap::{App, Arg};
use colored::*;
use shipsim::client::{ClientError, LineOutcome, ResponseReader};
use shipsim::config::{ClientConfig, ConnectPolicy, ControlKind, DeviceConfig, DEFAULT_PORT};
use shipsim::health::TcpConnector;
use shipsim::protocol::Response;
use shipsim::{Client, HealthEvent};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;

const DEFAULT_HOST: &str = "127.0.0.1";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let default_port = DEFAULT_PORT.to_string();
    let matches = App::new("shipsim")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("Operator console for the ship simulator")
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .help("Server host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Server port")
                .takes_value(true)
                .default_value(&default_port),
        )
        .arg(
            Arg::with_name("connect-policy")
                .long("connect-policy")
                .value_name("POLICY")
                .help("What /connect does while still connected")
                .takes_value(true)
                .possible_values(&["reject", "ignore"])
                .default_value("reject"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose logging on stderr"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(&default_port);
    let connect_policy: ConnectPolicy = matches
        .value_of("connect-policy")
        .unwrap_or("reject")
        .parse()?;

    let config = ClientConfig {
        server_addr: format!("{}:{}", host, port),
        connect_policy,
        devices: builtin_device_records(),
        ..ClientConfig::default()
    };

    println!("{}", "Ship Simulator Console".bright_blue().bold());
    println!("{} {}", "Connecting to".dimmed(), config.server_addr);

    let (mut client, mut events) = match Client::connect(TcpConnector, config).await {
        Ok(connected) => connected,
        Err(e) => {
            println!("{} {}", "Failed to connect to server:".bright_red(), e);
            return Err(e.into());
        }
    };
    let mut responses = client.take_responses().await;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    println!("Enter messages (empty line to send) or commands (starting with /):");
    prompt();

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match client.handle_line(&line).await {
                    Ok(LineOutcome::Exit) => break,
                    Ok(outcome) => report_outcome(outcome),
                    Err(ClientError::NotConnected) => println!(
                        "{}",
                        "Server is not connected. Only commands are available.".yellow()
                    ),
                    Err(e @ ClientError::Command(_)) | Err(e @ ClientError::Health(_)) => {
                        println!("{} {}", "Command error:".bright_red(), e)
                    }
                    Err(e) => println!("{} {}", "Error:".bright_red(), e),
                }
                prompt();
            }
            Some(event) = events.recv() => {
                match event {
                    HealthEvent::Disconnected => {
                        println!("\n{}", "[Server disconnected]".bright_red());
                    }
                    HealthEvent::Reconnected { manual } => {
                        if !manual {
                            println!("\n{}", "[Server reconnected]".bright_green());
                        }
                    }
                    HealthEvent::Exhausted { attempts } => {
                        let notice = format!(
                            "[Failed to reconnect after {} attempts. Only commands are available.]",
                            attempts
                        );
                        println!("\n{}", notice.yellow());
                    }
                    HealthEvent::TransportUpdated(transport) => {
                        responses = ResponseReader::from_transport(&transport).await;
                    }
                }
                prompt();
            }
            response = next_response(&mut responses) => {
                match response {
                    Ok(Some(response)) => print_response(&response),
                    Ok(None) => {
                        responses = None;
                        client.monitor().report_failure();
                    }
                    Err(e) => println!("{} {}", "Bad response from server:".bright_red(), e),
                }
            }
        }
    }

    let _ = client.close().await;
    Ok(())
}

async fn next_response(
    reader: &mut Option<ResponseReader>,
) -> Result<Option<Response>, ClientError> {
    match reader {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}

fn report_outcome(outcome: LineOutcome) {
    match outcome {
        LineOutcome::Queued { .. } | LineOutcome::Idle | LineOutcome::Exit => {}
        LineOutcome::Sent { count } => {
            println!("{} ({} message(s))", "[Sent successfully]".bright_green(), count)
        }
        LineOutcome::KillSent => println!("{}", "[Kill command sent]".yellow()),
        LineOutcome::Reconnected => println!("{}", "[Reconnected successfully]".bright_green()),
        LineOutcome::AlreadyConnected => println!("{}", "[Already connected]".dimmed()),
        LineOutcome::Devices(devices) => {
            if devices.is_empty() {
                println!("{}", "No devices configured".dimmed());
            }
            for device in devices {
                println!("  {}", device.bright_cyan());
            }
        }
        LineOutcome::Help(help) => println!("{}", help),
    }
}

fn print_response(response: &Response) {
    match response {
        Response::Success { id, values } => {
            let values: Vec<String> = values.iter().map(ToString::to_string).collect();
            println!("{} {} {}", "OK".green(), id.bright_white(), values.join(" "));
        }
        Response::Error { id, error } if id.is_empty() => {
            println!("{} {}", "ERR".red(), error.bright_red());
        }
        Response::Error { id, error } => {
            println!("{} {} {}", "ERR".red(), id.bright_white(), error.bright_red());
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Records for the devices the stock server registers.
fn builtin_device_records() -> Vec<DeviceConfig> {
    vec![
        DeviceConfig {
            id: "logger1".to_string(),
            label: "Logger".to_string(),
            kind: ControlKind::Input,
            options: Vec::new(),
        },
        DeviceConfig {
            id: "echo1".to_string(),
            label: "Echo".to_string(),
            kind: ControlKind::Input,
            options: Vec::new(),
        },
        DeviceConfig {
            id: "sensor1".to_string(),
            label: "Sensor".to_string(),
            kind: ControlKind::Input,
            options: Vec::new(),
        },
    ]
}
