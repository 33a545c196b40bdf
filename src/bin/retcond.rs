use retcon::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());

    let config_path = config::resolve_config_path(cli.config.as_deref());
    let config = match config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("retcond: {err}");
            std::process::exit(1);
        }
    };

    telemetry::init(cli.verbose, config.server.log_level);

    if let Err(err) = cli::run(&cli, &config) {
        eprintln!("retcond: {err}");
        std::process::exit(cli::exit_code(&err));
    }
}
