use clap::{Parser, Subcommand};
use std::process;

use llm_service::cmd;

#[derive(Parser)]
#[command(name = "llm-service")]
#[command(version)]
#[command(about = "Serve text generation models over HTTP", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Generate text through a running service
    Prompt {
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(long)]
        max_length: Option<i64>,
    },
    /// Multiply two numbers through a running service
    Multiply {
        #[arg(allow_hyphen_values = true)]
        x: String,
        #[arg(allow_hyphen_values = true)]
        y: String,
    },
    /// List the models this machine would serve
    #[command(alias = "ls")]
    Models,
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cmd::init_logging();

    let result = match cli.command {
        Commands::Serve { host, port } => cmd::serve(host, port).await,
        Commands::Prompt {
            text,
            model,
            max_length,
        } => cmd::prompt(text, model, max_length).await,
        Commands::Multiply { x, y } => cmd::multiply(&x, &y).await,
        Commands::Models => cmd::models().await,
        Commands::Version => cmd::version().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
