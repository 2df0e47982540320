use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use collector_stack::deploy::{deploy, DeployOptions};
use collector_stack::{synthesize, StackConfig, Template};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// collector-stack: synthesize and deploy the ADOT collector sample stack.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CliArgs {
    /// Increase logging verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the CloudFormation template.
    Synth {
        /// Stack configuration file (TOML). Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Write the template to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check the configuration and build the resource graph without output.
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Create or update the stack with CloudFormation.
    Deploy {
        #[arg(short, long, env = "STACK_NAME")]
        stack_name: String,

        /// URI of the function image already pushed to ECR.
        #[arg(short, long)]
        image_uri: String,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// AWS Region to use. Defaults to environment/profile configuration.
        #[arg(short = 'r', long = "aws-region")]
        aws_region: Option<String>,

        /// AWS Profile to use. Defaults to environment/profile configuration.
        #[arg(short = 'p', long = "aws-profile")]
        aws_profile: Option<String>,

        /// Return as soon as CloudFormation accepts the request.
        #[arg(long)]
        no_wait: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

fn render(template: &Template, format: Format) -> Result<String> {
    match format {
        Format::Json => template.to_json().context("Failed to render template as JSON"),
        Format::Yaml => template.to_yaml().context("Failed to render template as YAML"),
    }
}

fn load(config: Option<&Path>) -> Result<Template> {
    let config = StackConfig::load_or_default(config).context("Failed to load stack config")?;
    synthesize(&config).context("Failed to synthesize stack")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .parse_lossy(format!("collector_stack={log_level}")),
        )
        .init();

    match args.command {
        Command::Synth {
            config,
            format,
            output,
        } => {
            let template = load(config.as_deref())?;
            let rendered = render(&template, format)?;
            match output {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "template written");
                }
                None => println!("{rendered}"),
            }
        }
        Command::Validate { config } => {
            let template = load(config.as_deref())?;
            println!(
                "Configuration is valid: {} resources, {} outputs",
                template.resources.len(),
                template.outputs.len()
            );
        }
        Command::Deploy {
            stack_name,
            image_uri,
            config,
            aws_region,
            aws_profile,
            no_wait,
        } => {
            let template = load(config.as_deref())?;
            let options = DeployOptions {
                stack_name,
                image_uri,
                aws_region,
                aws_profile,
                wait: !no_wait,
            };
            let outcome = deploy(&template, &options).await?;
            println!("Stack '{}' {}", options.stack_name, outcome);
        }
    }
    Ok(())
}
