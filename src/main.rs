use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use toy_voice::{Config, Conversation, Daemon, SpeechClient, StdinTranscriber};

/// Toy Voice - speech pipeline for a talking toy
#[derive(Parser)]
#[command(name = "toyvoice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the TTS daemon (default)
    Daemon {
        /// Address to listen on
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Language to pre-warm before accepting requests
        #[arg(long)]
        prestart: Option<String>,
    },
    /// Speak text through the daemon, or directly if it is not running
    Say {
        /// Text to speak
        text: String,
        /// Language code (en, de)
        #[arg(short, long, default_value = "en")]
        lang: String,
        /// Fail instead of synthesizing directly when the daemon is unreachable
        #[arg(long)]
        daemon_only: bool,
    },
    /// Talk to the toy, one utterance per stdin line
    Chat {
        /// Start a fresh session
        #[arg(long)]
        reset: bool,
    },
    /// List configured voices and whether their model files are present
    Voices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,toy_voice=info",
        1 => "info,toy_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    // RUST_LOG wins over -v
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load();
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Daemon {
        host: None,
        port: None,
        prestart: None,
    }) {
        Command::Daemon {
            host,
            port,
            prestart,
        } => run_daemon(config, host, port, prestart).await,
        Command::Say {
            text,
            lang,
            daemon_only,
        } => say(&config, &text, &lang, daemon_only).await,
        Command::Chat { reset } => chat(&config, reset).await,
        Command::Voices => {
            list_voices(&config);
            Ok(())
        }
    }
}

/// Run the daemon until interrupted
async fn run_daemon(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
    prestart: Option<String>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.daemon.host = host;
    }
    if let Some(port) = port {
        config.daemon.port = port;
    }
    if prestart.is_some() {
        config.daemon.prestart_language = prestart;
    }

    tracing::info!(
        addr = %config.daemon.addr(),
        sink = %config.player.sink,
        voices = ?config.voices.languages().collect::<Vec<_>>(),
        "starting tts daemon"
    );

    Daemon::new(&config).run().await?;
    Ok(())
}

/// Speak one line of text
async fn say(config: &Config, text: &str, lang: &str, daemon_only: bool) -> anyhow::Result<()> {
    let client = SpeechClient::new(config).daemon_only(daemon_only || config.daemon.required);
    client.speak(text, lang).await?;
    Ok(())
}

/// Run the conversation loop on stdin
async fn chat(config: &Config, reset: bool) -> anyhow::Result<()> {
    let mut conversation = Conversation::new(
        &config.conversation,
        StdinTranscriber::new(),
        SpeechClient::new(config),
    )?;

    if reset {
        conversation.reset()?;
    }

    println!("Type what the child says, one line per utterance. Ctrl-D to quit.");
    conversation.run().await?;
    Ok(())
}

/// Print each configured voice and whether it resolves
fn list_voices(config: &Config) {
    for language in config.voices.languages() {
        match config.voices.resolve(language) {
            Ok(profile) => println!(
                "{language}: {} ({} Hz)",
                profile.model_path.display(),
                profile.sample_rate
            ),
            Err(e) => println!("{language}: unavailable ({e})"),
        }
    }
}
