//! turnstream CLI binary entry point.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use turnstream::cli::{load_config, ChatArgs, Cli, Commands, ConfigArgs};
use turnstream::engine::ConversationEngine;
use turnstream::error::EngineError;
use turnstream::types::{Message, Role};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse_args();

    let result = match cli.command {
        Commands::Chat(args) => handle_chat(args).await,
        Commands::Config(args) => handle_config(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_chat(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.resolve_config()?;
    let image = args.read_image()?;
    let engine = Arc::new(ConversationEngine::from_config(config));

    let done = CancellationToken::new();
    let printer = tokio::spawn(print_reply(engine.subscribe(), done.clone()));

    let stop = engine.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let submitted = engine.submit(args.prompt, image).await;
    done.cancel();
    let _ = printer.await;
    println!();

    let outcome = match submitted {
        Ok(outcome) => outcome,
        Err(EngineError::Rejected(rejection)) => {
            return Err(engine.describe_rejection(&rejection).into());
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(class) = outcome.failure {
        eprintln!("{} ({class})", outcome.message.content);
        return Ok(());
    }

    let extras = &outcome.message.extras;
    for item in &extras.recommendations {
        match &item.price {
            Some(price) => println!("  * {} ({price})", item.name),
            None => println!("  * {}", item.name),
        }
    }
    for source in &extras.sources {
        println!("  [{}] {}", source.title, source.url);
    }
    for followup in &extras.followups {
        println!("  > {followup}");
    }
    Ok(())
}

fn handle_config(args: ConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_deref())?;
    if config.api_key.is_some() {
        config.api_key = Some("<redacted>".to_string());
    }
    print!("{}", toml::to_string(&config)?);
    Ok(())
}

/// Print the assistant reply as it grows; a restarted attempt starts a new line.
async fn print_reply(mut rx: watch::Receiver<Vec<Message>>, done: CancellationToken) {
    let mut printed = String::new();
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = done.cancelled() => break,
        }
        let current = rx
            .borrow_and_update()
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.is_error)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        match current.strip_prefix(printed.as_str()) {
            Some(rest) => print!("{rest}"),
            None => {
                println!();
                print!("{current}");
            }
        }
        let _ = std::io::stdout().flush();
        printed = current;
    }
}
