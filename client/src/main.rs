//! Sirius TTS Client
//!
//! Connects to the synthesis service, sends text and plays the returned audio as soon as
//! it arrives.
//!
//! Usage:
//!   # Interactive mode (type text, press Enter to synthesize and play)
//!   cargo run --release -p sirius-client
//!
//!   # Single text mode
//!   cargo run --release -p sirius-client -- --text "Hello world"
//!
//!   # Voice cloning with a reference sample, saved to a file instead of played
//!   cargo run --release -p sirius-client -- --protocol clone --reference my_voice.wav \
//!       --text "Hello world" --output hello.wav

mod audio;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use sirius_client::config::parse_retention;
use sirius_client::{
    ClientConfig, ClientUpdate, ProtocolGeneration, ReferenceAudio, ResourceId, TtsClient,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sirius TTS Client")]
struct Args {
    /// Service host (overrides SIRIUS_HOST)
    #[arg(short, long)]
    server: Option<String>,

    /// Service port (overrides SIRIUS_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Request framing: "text" or "clone" (overrides SIRIUS_PROTOCOL)
    #[arg(long)]
    protocol: Option<ProtocolGeneration>,

    /// Reference voice sample sent with every request in clone mode
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Language code (overrides SIRIUS_LANGUAGE)
    #[arg(short, long)]
    lang: Option<String>,

    /// Seconds to wait for audio, 0 to wait forever (overrides SIRIUS_TIMEOUT_SECS)
    #[arg(long)]
    timeout: Option<u64>,

    /// Results to keep, 0 keeps only the latest (overrides SIRIUS_HISTORY)
    #[arg(long)]
    history: Option<String>,

    /// Tag clone requests with an increasing request id
    #[arg(long)]
    tag_requests: bool,

    /// Text to synthesize (if not provided, runs in interactive mode)
    #[arg(short, long)]
    text: Option<String>,

    /// Output file (if not provided, plays audio directly)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    /// Environment configuration with command line overrides applied.
    fn config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::from_env()?;
        if let Some(host) = &self.server {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(generation) = self.protocol {
            config.generation = generation;
        }
        if let Some(lang) = &self.lang {
            config.language = lang.clone();
        }
        if let Some(secs) = self.timeout {
            config.synthesis_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(history) = &self.history {
            config.retention = parse_retention(history)?;
        }
        config.tag_requests |= self.tag_requests;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sirius_client=info".parse()?)
                .add_directive("tokio_tungstenite=warn".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut reference = args.reference.as_deref().map(load_reference).transpose()?;

    let mut client = TtsClient::new(args.config()?)?;
    client.connect();
    client
        .wait_until_connected()
        .await
        .with_context(|| format!("could not connect to {}", client.config().endpoint()))?;
    info!("Connected!");

    if let Some(text) = &args.text {
        synthesize_and_play(&mut client, text, reference.as_ref(), args.output.as_deref()).await?;
    } else {
        interactive(&mut client, &mut reference).await?;
    }

    client.shutdown();
    Ok(())
}

async fn interactive(client: &mut TtsClient, reference: &mut Option<ReferenceAudio>) -> Result<()> {
    println!("Sirius TTS Client - Interactive Mode");
    println!("=====================================");
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut show_prompt = true;

    loop {
        if show_prompt {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
        }
        show_prompt = true;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            update = client.next_update() => {
                match update {
                    Some(update) => report(&update),
                    None => break,
                }
                show_prompt = false;
                continue;
            }
        };

        // EOF
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == ":q" || line == ":quit" {
            println!("Goodbye!");
            break;
        }

        if let Some(command) = line.strip_prefix(':') {
            if let Err(e) = run_command(client, reference, command).await {
                error!("Error: {}", e);
            }
            continue;
        }

        if !client.can_submit() {
            println!("Not ready: {} (:reconnect to open a new connection)", client.status());
            continue;
        }

        if let Err(e) = synthesize_and_play(client, line, reference.as_ref(), None).await {
            error!("Error: {}", e);
        }
    }

    Ok(())
}

async fn run_command(
    client: &mut TtsClient,
    reference: &mut Option<ReferenceAudio>,
    command: &str,
) -> Result<()> {
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "ref" if arg.is_empty() => {
            *reference = None;
            println!("Reference audio cleared");
        }
        "ref" => {
            let loaded = load_reference(Path::new(arg))?;
            println!("Reference audio: {} ({} bytes)", loaded.file_name, loaded.data.len());
            if !client.config().generation.requires_reference_audio() {
                println!("Note: the sample is only sent in clone mode (:protocol clone)");
            }
            *reference = Some(loaded);
        }
        "lang" => {
            client.set_language(arg)?;
            println!("Language changed to: {}", arg);
        }
        "protocol" => {
            let generation: ProtocolGeneration = arg.parse().map_err(anyhow::Error::msg)?;
            client.set_generation(generation);
            println!("Protocol changed to: {}", generation);
        }
        "reconnect" => {
            client.reconnect();
            client.wait_until_connected().await?;
            println!("Reconnected");
        }
        "status" => println!("{}", client.status()),
        "history" => {
            if client.audio().is_empty() {
                println!("No audio yet");
            }
            for (index, resource) in client.history().enumerate() {
                let length = resource
                    .wav_info()
                    .map(|info| format!("{:.2}s", info.duration.as_secs_f32()))
                    .unwrap_or_else(|| "unknown length".to_string());
                let age = resource
                    .received_at()
                    .elapsed()
                    .map(|elapsed| elapsed.as_secs())
                    .unwrap_or_default();
                println!(
                    "{:>3}: {} {} bytes, {}, {}s ago",
                    index + 1,
                    resource.id(),
                    resource.len(),
                    length,
                    age
                );
            }
        }
        "replay" => {
            let index = history_index(arg)?;
            let id = client
                .history()
                .nth(index - 1)
                .map(|resource| resource.id())
                .with_context(|| format!("no audio #{index}"))?;
            play(client, id).await?;
        }
        _ => print_help(),
    }
    Ok(())
}

/// 1-based position in the history, as typed after `:replay`.
fn history_index(arg: &str) -> Result<usize> {
    arg.parse::<usize>()
        .ok()
        .filter(|&index| index > 0)
        .context("usage: :replay <n>, counting from 1")
}

fn print_help() {
    println!("Type text and press Enter to synthesize and play.");
    println!("Commands:");
    println!("  :q or :quit       - Exit");
    println!("  :ref <path>       - Use a reference voice sample (:ref alone clears it)");
    println!("  :lang <code>      - Change language");
    println!("  :protocol <mode>  - Switch between 'text' and 'clone' requests");
    println!("  :reconnect        - Drop the connection and open a new one");
    println!("  :history          - List received audio");
    println!("  :replay <n>       - Play entry n of the history");
    println!("  :status           - Show connection status");
    println!();
}

fn report(update: &ClientUpdate) {
    match update {
        ClientUpdate::Disconnected { error: Some(error) } => {
            warn!("Disconnected: {} (:reconnect to try again)", error)
        }
        ClientUpdate::Disconnected { error: None } => {
            warn!("Connection closed by server (:reconnect to try again)")
        }
        ClientUpdate::StaleAudio { bytes } => warn!("Dropped {} bytes of unrequested audio", bytes),
        ClientUpdate::ProtocolError(error) => warn!("Unreadable message from server: {}", error),
        _ => {}
    }
}

async fn synthesize_and_play(
    client: &mut TtsClient,
    text: &str,
    reference: Option<&ReferenceAudio>,
    output: Option<&Path>,
) -> Result<()> {
    let reference = if client.config().generation.requires_reference_audio() {
        reference.cloned()
    } else {
        None
    };

    client.submit(text, reference)?;
    let id = client.wait_for_outcome().await?;

    if let Some(output_path) = output {
        if let Some(resource) = client.resource(id) {
            resource.save(output_path)?;
            println!("Audio saved to: {}", output_path.display());
        }
        return Ok(());
    }

    println!("Playing audio...");
    play(client, id).await
}

async fn play(client: &TtsClient, id: ResourceId) -> Result<()> {
    let Some(resource) = client.resource(id) else {
        return Ok(());
    };
    let bytes = resource.shared_bytes();
    tokio::task::spawn_blocking(move || audio::play_wav_bytes(bytes)).await?
}

fn load_reference(path: &Path) -> Result<ReferenceAudio> {
    let data = std::fs::read(path)
        .with_context(|| format!("cannot read reference audio {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "reference.wav".to_string());
    let content_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("mp3") => "audio/mpeg",
        Some(ext) if ext.eq_ignore_ascii_case("flac") => "audio/flac",
        Some(ext) if ext.eq_ignore_ascii_case("ogg") => "audio/ogg",
        _ => "audio/wav",
    };
    Ok(ReferenceAudio::new(file_name, data).with_content_type(content_type))
}
