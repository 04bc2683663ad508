use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use beacon_live::voice::{
    AudioCapture, AudioPlayback, CaptureUnit, CpalSink, PLAYBACK_SAMPLE_RATE, PlaybackEvent,
    PlaybackUnit, pcm,
};
use beacon_live::{
    AudioContext, Config, ConnectionStatus, LiveController, Persona, PlaybackChunk,
    SessionEvent, TranscriptRoute,
};

/// Beacon Live - Real-time voice conversations with a generative voice model
#[derive(Parser)]
#[command(name = "beacon-live", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Talk with push-to-talk: press Enter to start and stop recording
    Talk {
        /// Persona file (JSON, TOML, or plain text system instruction)
        #[arg(short, long, env = "BEACON_LIVE_PERSONA_FILE")]
        persona_file: Option<PathBuf>,

        /// Prebuilt voice override
        #[arg(long)]
        voice: Option<String>,

        /// Live model override
        #[arg(long)]
        model: Option<String>,

        /// Get transcripts from the text companion instead of the live session
        #[arg(long)]
        companion: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// List audio devices
    Devices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,beacon_live=info",
        1 => "info,beacon_live=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Talk {
        persona_file: None,
        voice: None,
        model: None,
        companion: false,
    }) {
        Command::Talk {
            persona_file,
            voice,
            model,
            companion,
        } => {
            let mut config = Config::load()?;
            if let Some(path) = persona_file {
                config.apply_persona(Persona::load(&path)?);
            }
            if let Some(voice) = voice {
                config.live.voice = voice;
            }
            if let Some(model) = model {
                config.live.model = model;
            }
            if companion {
                config.session.transcript_route = TranscriptRoute::Companion;
            }
            talk(&config).await
        }
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::Devices => list_devices(),
    }
}

/// Interactive push-to-talk session over stdin
async fn talk(config: &Config) -> anyhow::Result<()> {
    let mut controller = LiveController::from_config(config)?;
    let printer = tokio::spawn(print_events(controller.subscribe()));

    open_session(&mut controller, config.session.connect_timeout).await?;

    println!("Connected. Press Enter to start/stop talking, type text to send it,");
    println!("/reconnect to start over, /quit to exit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut controller, line.trim(), config).await {
                    break;
                }
            }
            () = controller.process_next() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.shutdown().await;
    printer.abort();
    Ok(())
}

/// Handle one line of input; returns `false` to exit
async fn handle_line(controller: &mut LiveController, line: &str, config: &Config) -> bool {
    match line {
        "/quit" | "/exit" => return false,
        "/reconnect" => {
            controller.disconnect().await;
            if let Err(e) = open_session(controller, config.session.connect_timeout).await {
                println!("reconnect failed: {e}");
            }
        }
        "" if controller.is_recording() => match controller.end_capture() {
            Ok(frames) => println!("(sent {frames} frames)"),
            Err(e) => println!("{e}"),
        },
        "" => match controller.begin_capture().await {
            Ok(()) => println!("(recording, press Enter to send)"),
            Err(e) => println!("{e}"),
        },
        text => {
            if let Err(e) = controller.send_text(text) {
                println!("{e}");
            }
        }
    }

    if controller.status() == ConnectionStatus::Disconnected {
        println!("Disconnected. Type /reconnect to start a new session or /quit to exit.");
    }
    true
}

/// Connect and wait for the session to open, abandoning it after `timeout`
async fn open_session(controller: &mut LiveController, timeout: Duration) -> anyhow::Result<()> {
    controller.connect().await?;

    match tokio::time::timeout(timeout, controller.wait_until_connected()).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            controller.disconnect().await;
            anyhow::bail!("session did not open within {}s", timeout.as_secs())
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Transcript { text }) => println!("\n> {text}\n"),
            Ok(SessionEvent::Speaking { active: true }) => println!("(speaking)"),
            Ok(SessionEvent::Interrupted) => println!("(interrupted)"),
            Ok(SessionEvent::Error { kind, message }) => println!("error [{kind:?}]: {message}"),
            Ok(SessionEvent::StatusChanged { status }) => tracing::debug!(%status, "status"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = Config::load()?;
    let mut capture = AudioCapture::new(config.audio_context(), config.audio.frame_samples);
    let (tx, mut rx) = mpsc::unbounded_channel();
    capture.start(tx)?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        let mut frames = 0;
        while let Ok(frame) = rx.try_recv() {
            samples.extend_from_slice(frame.samples());
            frames += 1;
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] frames: {frames:2} | RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]",
            i + 1
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: beacon-live devices");
    println!("  3. Set BEACON_LIVE_INPUT_DEVICE to pick another input");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave through the playback queue
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let config = Config::load()?;
    let (playback, mut events) = AudioPlayback::new(CpalSink::new(config.audio_context()));

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());

    playback.enqueue(PlaybackChunk::pcm24k(pcm::encode_pcm16(&samples)));

    let wait = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if event == PlaybackEvent::Ended {
                break;
            }
        }
    });
    if wait.await.is_err() {
        playback.stop();
        println!("Playback did not finish in time");
    }
    playback.close();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: beacon-live devices");
    println!("  2. Set BEACON_LIVE_OUTPUT_DEVICE to pick another output");

    Ok(())
}

/// List audio devices
fn list_devices() -> anyhow::Result<()> {
    let devices = AudioContext::devices()?;

    println!("Input devices:");
    for name in &devices.inputs {
        let marker = if devices.default_input.as_ref() == Some(name) { "*" } else { " " };
        println!(" {marker} {name}");
    }

    println!("\nOutput devices:");
    for name in &devices.outputs {
        let marker = if devices.default_output.as_ref() == Some(name) { "*" } else { " " };
        println!(" {marker} {name}");
    }

    Ok(())
}
