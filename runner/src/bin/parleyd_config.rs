use parley::RelayConfig;

fn main() {
    let config =
        serdeconv::to_toml_string(&RelayConfig::default()).expect("Failed to generate config file");

    println!("{}", config);
}
