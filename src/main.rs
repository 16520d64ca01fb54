use colored::*;
use log::{error, info};

use netbind::cli::{create_cli, CliArgs};
use netbind::session::Session;

fn main() {
    let matches = create_cli().get_matches();
    let args = match CliArgs::from_matches(&matches) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", format!("Error: {:#}", e).red());
            std::process::exit(2);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level().to_string()),
    )
    .init();

    if let Err(e) = run_application(&args) {
        error!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

fn run_application(args: &CliArgs) -> anyhow::Result<()> {
    info!("{}", "Starting netbind".green().bold());
    info!("Input file: {}", args.input_file.display().to_string().bright_blue());

    if !args.input_file.exists() {
        return Err(anyhow::anyhow!("Input file '{}' not found", args.input_file.display()));
    }

    let config = args.engine_config()?;
    if let Some(history) = &config.history_file {
        info!("Designator history: {}", history.display());
    }

    let mut session = Session::new(config);
    session.load_trace(&args.input_file)?;

    if let Some(output_file) = &args.output_file {
        session.export_results(output_file, args.output_format)?;
        info!("Results exported to: {}", output_file.display().to_string().bright_green());
    } else {
        session.print_summary();
    }

    info!("{}", "Done".green().bold());
    Ok(())
}
