use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use parley::dialogue::{DialogueChannel, DirectLineChannel};
use parley::language::{LanguageClassifier, TextAnalyticsClassifier};
use parley::voice::{
    AudioSink, AzureSpeechSynthesizer, DrainSink, PCM_SAMPLE_RATE, PlaybackLimits,
    SpeechRecognizer, SpeechSynthesizer, UnavailableRecognizer, encode_pcm16, memory_stream,
};
use parley::{Config, ConversationEvent, LanguageTag, Orchestrator, TurnOutcome};

/// Parley - Talk to a Bot Framework agent by voice
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Config file (default: ~/.config/parley/config.toml)
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// No microphone or speaker (typed input only, audio decoded and discarded)
    #[arg(long, env = "PARLEY_HEADLESS")]
    headless: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Interactive conversation (default)
    Chat,
    /// Send one message and speak the reply
    Say {
        /// Message text
        text: String,
    },
    /// Print the synthesis language detected for text
    Detect {
        /// Text to classify
        text: String,
    },
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
        /// Language (en-US, ja-JP, zh-TW); detected when omitted
        #[arg(short, long)]
        language: Option<LanguageTag>,
    },
    /// Test microphone input and recognition
    TestMic {
        /// Longest utterance in seconds
        #[arg(short, long, default_value = "15")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,parley=info",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(
        region = ?config.speech.region,
        user_id = %config.direct_line.user_id,
        initial_language = %config.conversation.initial_language,
        "loaded configuration"
    );

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(&config, cli.headless).await,
        Command::Say { text } => say(&config, cli.headless, &text).await,
        Command::Detect { text } => detect(&config, &text).await,
        Command::TestTts { text, language } => {
            test_tts(&config, cli.headless, &text, language).await
        }
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker(cli.headless).await,
    }
}

/// Interactive loop: Enter starts a voice turn, any other line is sent as text
async fn chat(config: &Config, headless: bool) -> anyhow::Result<()> {
    let orchestrator = start_conversation(config, headless).await?;
    let printer = spawn_event_printer(orchestrator.subscribe());

    if headless {
        println!("Type a message and press Enter. \"quit\" exits.");
    } else {
        println!("Press Enter and speak, or type a message. \"quit\" exits.");
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "quit" | "exit" => break,
            "" => report_busy(&orchestrator.begin_turn().await),
            text => {
                let outcome = orchestrator.submit_text(text).await;
                if let TurnOutcome::Dispatched { text, .. } = &outcome {
                    println!("you: {text}");
                }
                report_busy(&outcome);
            }
        }
    }

    printer.abort();
    tracing::info!("conversation ended");
    Ok(())
}

/// Send one message and wait until its reply has been spoken
async fn say(config: &Config, headless: bool, text: &str) -> anyhow::Result<()> {
    let orchestrator = start_conversation(config, headless).await?;
    let mut events = orchestrator.subscribe();

    let turn = match orchestrator.submit_text(text).await {
        TurnOutcome::Dispatched { turn, .. } => turn,
        other => anyhow::bail!("message not sent: {other:?}"),
    };

    loop {
        match events.recv().await {
            Ok(ConversationEvent::ReplyReceived(reply)) => println!("bot: {reply}"),
            Ok(ConversationEvent::Diagnostic(diagnostic)) => {
                println!("! {}", diagnostic.message);
            }
            Ok(ConversationEvent::StateChanged { turn: t, to, .. }) if t == turn && to.is_idle() => {
                break;
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    Ok(())
}

/// Wire the orchestrator to Direct Line and the speech services
async fn start_conversation(config: &Config, headless: bool) -> anyhow::Result<Arc<Orchestrator>> {
    let secret = config
        .direct_line
        .secret
        .clone()
        .context("DIRECT_LINE_SECRET is not set")?;
    let channel = DirectLineChannel::new(secret, config.direct_line.user_id.clone())?
        .with_base_url(config.direct_line.endpoint.clone());

    let mut builder = Orchestrator::builder()
        .recognizer(build_recognizer(config, headless)?)
        .channel(Arc::new(channel.clone()))
        .synthesizer(build_synthesizer(config)?)
        .sink(build_sink(
            headless,
            PlaybackLimits::with_max_duration(config.conversation.max_playback),
        )?)
        .settings(config.conversation.clone());

    if let Some(classifier) = build_classifier(config)? {
        builder = builder.classifier(classifier);
    } else {
        tracing::warn!(
            language = %config.conversation.initial_language,
            "language detection not configured, replies use a fixed language"
        );
    }

    let orchestrator = Arc::new(builder.build()?);

    channel.connect().await?;
    orchestrator.attach()?;
    channel.start_polling(config.direct_line.poll_interval);

    tracing::info!(headless, "parley ready");
    Ok(orchestrator)
}

fn build_synthesizer(config: &Config) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    let (key, region) = config.speech.credentials()?;
    Ok(Arc::new(AzureSpeechSynthesizer::new(
        key.to_string(),
        region,
        config.speech.voices.clone(),
    )?))
}

fn build_classifier(config: &Config) -> anyhow::Result<Option<Arc<dyn LanguageClassifier>>> {
    let Some((endpoint, key)) = config.language.credentials() else {
        return Ok(None);
    };
    Ok(Some(Arc::new(TextAnalyticsClassifier::new(
        endpoint,
        key.to_string(),
    )?)))
}

#[cfg(feature = "audio-io")]
fn build_recognizer(config: &Config, headless: bool) -> anyhow::Result<Arc<dyn SpeechRecognizer>> {
    use parley::voice::{AzureSpeechRecognizer, EndpointSettings, MicrophoneCapture};

    if headless {
        return Ok(Arc::new(UnavailableRecognizer));
    }
    let (key, region) = config.speech.credentials()?;
    Ok(Arc::new(AzureSpeechRecognizer::new(
        MicrophoneCapture::new(EndpointSettings::default()),
        key.to_string(),
        region,
        &config.speech.recognition_language,
    )?))
}

#[cfg(not(feature = "audio-io"))]
fn build_recognizer(_config: &Config, _headless: bool) -> anyhow::Result<Arc<dyn SpeechRecognizer>> {
    Ok(Arc::new(UnavailableRecognizer))
}

#[cfg(feature = "audio-io")]
fn build_sink(headless: bool, limits: PlaybackLimits) -> anyhow::Result<Arc<dyn AudioSink>> {
    if headless {
        return Ok(Arc::new(DrainSink::new(limits)));
    }
    Ok(Arc::new(parley::voice::SpeakerSink::new(limits)?))
}

#[cfg(not(feature = "audio-io"))]
fn build_sink(_headless: bool, limits: PlaybackLimits) -> anyhow::Result<Arc<dyn AudioSink>> {
    Ok(Arc::new(DrainSink::new(limits)))
}

fn spawn_event_printer(
    mut events: broadcast::Receiver<ConversationEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ConversationEvent::Recognized(text)) => println!("you: {text}"),
                Ok(ConversationEvent::ReplyReceived(text)) => println!("bot: {text}"),
                Ok(ConversationEvent::Diagnostic(diagnostic)) => {
                    println!("! {}", diagnostic.message);
                }
                Ok(ConversationEvent::StateChanged { to, .. }) if to.is_idle() => {
                    println!("(ready)");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn report_busy(outcome: &TurnOutcome) {
    if let TurnOutcome::Busy(state) = outcome {
        println!("(busy: {state}, wait until ready)");
    }
}

/// Classify text and print the mapped tag
async fn detect(config: &Config, text: &str) -> anyhow::Result<()> {
    let classifier = build_classifier(config)?
        .context("AZURE_LANGUAGE_ENDPOINT and AZURE_LANGUAGE_KEY must be set")?;

    let code = classifier.classify(text).await?;
    println!("{code} -> {}", LanguageTag::from_code(&code));

    Ok(())
}

/// Test TTS output through the streaming playback path
async fn test_tts(
    config: &Config,
    headless: bool,
    text: &str,
    language: Option<LanguageTag>,
) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let language = match (language, build_classifier(config)?) {
        (Some(language), _) => language,
        (None, Some(classifier)) => LanguageTag::from_code(&classifier.classify(text).await?),
        (None, None) => config.conversation.initial_language,
    };

    let synthesizer = build_synthesizer(config)?;
    let sink = build_sink(
        headless,
        PlaybackLimits::with_max_duration(config.conversation.max_playback),
    )?;

    println!("Synthesizing speech ({language})...");
    let stream = synthesizer.speak(text, language).await?;
    let report = sink.play(stream).await?;

    #[allow(clippy::cast_precision_loss)]
    let seconds = report.samples as f32 / PCM_SAMPLE_RATE as f32;
    println!("Played {} samples ({seconds:.1}s)", report.samples);
    if let Some(reason) = report.interrupted {
        println!("Stream ended early: {reason}");
    }

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Test microphone input with one recognized utterance
#[cfg(feature = "audio-io")]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    use std::time::Duration;

    use parley::voice::{
        AzureSpeechRecognizer, EndpointSettings, MicrophoneCapture, RecognitionOutcome,
        UtteranceCapture,
    };

    let settings = EndpointSettings {
        max_duration: Duration::from_secs(duration),
        ..EndpointSettings::default()
    };
    let capture = MicrophoneCapture::new(settings);

    println!("Speak into your microphone (up to {duration} seconds)...\n");

    let Ok((key, region)) = config.speech.credentials() else {
        // No speech resource: just show that audio arrives
        match capture.capture_utterance().await? {
            Some(samples) => println!(
                "Captured {} samples at {} Hz (set AZURE_SPEECH_KEY to transcribe)",
                samples.len(),
                capture.sample_rate()
            ),
            None => println!("No speech detected."),
        }
        return Ok(());
    };

    let recognizer = AzureSpeechRecognizer::new(
        capture,
        key.to_string(),
        region,
        &config.speech.recognition_language,
    )?;
    let utterance = recognizer.recognize_once().await;

    match utterance.outcome {
        RecognitionOutcome::Recognized => println!("RECOGNIZED: Text={}", utterance.text),
        RecognitionOutcome::NoMatch => println!("NOMATCH: Speech could not be recognized."),
        RecognitionOutcome::Canceled(details) => println!("CANCELED: {details}"),
    }

    println!("\n---");
    println!("If nothing was captured, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

#[cfg(not(feature = "audio-io"))]
#[allow(clippy::unused_async)]
async fn test_mic(_config: &Config, _duration: u64) -> anyhow::Result<()> {
    anyhow::bail!("built without the audio-io feature; no microphone support")
}

/// Test speaker output with a sine wave streamed through the PCM ring
async fn test_speaker(headless: bool) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = build_sink(headless, PlaybackLimits::default())?;

    let frequency = 440.0_f32;
    let num_samples = PCM_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PCM_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    // Deliver in 100 ms chunks, like a network stream
    let pcm = encode_pcm16(&samples);
    let chunks = pcm.chunks(4800).map(Bytes::copy_from_slice).collect();

    println!("Playing {} samples at {} Hz...", samples.len(), PCM_SAMPLE_RATE);
    let report = sink.play(memory_stream(chunks)).await?;
    tracing::debug!(samples = report.samples, "tone played");

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
