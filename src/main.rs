use clap::Parser;
use screen_repair::cli::commands::{cmd_repair, cmd_validate};
use screen_repair::cli::config::{Cli, Commands, load_config};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(cli.config.as_deref());

    // Resolve Ollama settings: CLI > config > defaults
    let ollama_endpoint = cli
        .ollama_endpoint
        .as_deref()
        .or(config.ollama.endpoint.as_deref());
    let ollama_model = cli
        .ollama_model
        .as_deref()
        .or(config.ollama.model.as_deref());

    let valid = match cli.command {
        Commands::Validate {
            html,
            archetype,
            format,
            output,
        } => cmd_validate(&html, archetype.as_deref(), &format, output.as_deref(), &config)?,
        Commands::Repair {
            html,
            request,
            archetype,
            out_html,
            format,
            output,
            no_llm,
        } => cmd_repair(
            &html,
            &request,
            archetype.as_deref(),
            out_html.as_deref(),
            &format,
            output.as_deref(),
            no_llm,
            cli.trace.as_deref(),
            ollama_endpoint,
            ollama_model,
            &config,
        )?,
    };

    if !valid {
        std::process::exit(1);
    }

    Ok(())
}
