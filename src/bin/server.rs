use clap::{App, Arg};
use shipsim::config::{ServerConfig, DEFAULT_PORT};
use shipsim::device::{Echo, Logger, Sensor};
use shipsim::{Server, Ship};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_TICK_MS: &str = "10";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let default_port = DEFAULT_PORT.to_string();
    let matches = App::new("shipsim-server")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("Ship simulator service: device runtime behind a line-oriented TCP protocol")
        .arg(
            Arg::with_name("bind")
                .short("b")
                .long("bind")
                .value_name("ADDR")
                .help("Address to listen on")
                .takes_value(true)
                .default_value(DEFAULT_BIND),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Port to listen on")
                .takes_value(true)
                .default_value(&default_port)
                .validator(|v| match v.parse::<u16>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Port must be a number between 0 and 65535".into()),
                }),
        )
        .arg(
            Arg::with_name("tick-ms")
                .long("tick-ms")
                .value_name("MILLIS")
                .help("Resolution of the shared device clock")
                .takes_value(true)
                .default_value(DEFAULT_TICK_MS)
                .validator(|v| match v.parse::<u64>() {
                    Ok(ms) if ms > 0 => Ok(()),
                    _ => Err("Tick resolution must be a positive number of milliseconds".into()),
                }),
        )
        .get_matches();

    tracing_subscriber::fmt::init();

    let bind = matches.value_of("bind").unwrap_or(DEFAULT_BIND);
    let port = matches.value_of("port").unwrap_or(&default_port);
    let tick_ms: u64 = matches.value_of("tick-ms").unwrap_or(DEFAULT_TICK_MS).parse()?;

    let config = ServerConfig {
        bind_addr: format!("{}:{}", bind, port),
        tick_resolution: Duration::from_millis(tick_ms),
    };

    let ship = Arc::new(Ship::with_resolution(config.tick_resolution));
    register_builtin_devices(&ship);
    ship.start();

    let server = Server::bind(&config, Arc::clone(&ship)).await?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            shutdown.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}

fn register_builtin_devices(ship: &Ship) {
    let devices: Vec<Box<dyn shipsim::Device>> = vec![
        Box::new(Logger::new("logger1")),
        Box::new(Echo::new("echo1")),
        Box::new(Sensor::new("sensor1", 20.0, 0.5)),
    ];

    for device in devices {
        let id = device.id().to_string();
        if let Err(e) = ship.register_device(device) {
            error!(device = %id, error = %e, "error registering device");
        }
    }
}
