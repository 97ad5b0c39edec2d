use clap::{App, Arg};
use parley::logging;
use parley::{RelayConfig, Server};
use std::process;

pub fn main() {
    let matches = App::new("parleyd")
        .version("0.1.0")
        .about("Runs the chat relay server.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .long("config")
                .takes_value(true)
                .help("Path to the config file"),
        )
        .arg(
            Arg::with_name("HOST")
                .long("host")
                .takes_value(true)
                .help("Listen host, overrides the config file"),
        )
        .arg(
            Arg::with_name("PORT")
                .long("port")
                .takes_value(true)
                .help("Listen port, overrides the config file"),
        )
        .arg(
            Arg::with_name("LOG_LEVEL")
                .long("log-level")
                .takes_value(true)
                .help("Log level, overrides the config file"),
        )
        .get_matches();

    let mut config = match matches.value_of("CONFIG_FILE") {
        Some(path) => RelayConfig::load(path),
        None => RelayConfig::default(),
    };

    if let Some(host) = matches.value_of("HOST") {
        config.server.host = host.to_string();
    }
    if let Some(port) = matches.value_of("PORT") {
        config.server.port = port.parse().expect("Invalid port");
    }
    if let Some(level) = matches.value_of("LOG_LEVEL") {
        config.log.level = level.to_string();
    }

    let logger = logging::init(&config.log.level);

    let server = match Server::bind(&config, logger.clone()) {
        Ok(server) => server,
        Err(err) => {
            logging::error!(logger, "failed to bind";
                            "address" => config.address(),
                            "error" => ?err);
            process::exit(1);
        }
    };

    if let Err(err) = server.run() {
        logging::error!(logger, "server terminated"; "error" => ?err);
        process::exit(1);
    }
}
