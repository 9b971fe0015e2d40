mod cli;
mod config_file;
mod error;
mod logging;

use clap::Parser;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let runtime = match cli.runtime_config() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("lxcri: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(&runtime, cli.verbose as usize) {
        eprintln!("lxcri: failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = cli.handler().handler(&runtime) {
        log::error!("{e}");
        eprintln!("lxcri: {e}");
        std::process::exit(1);
    }
}
