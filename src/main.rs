use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use framegate::config::{Config, app_name, version};
use framegate::decoder::{Decoder, Pushed};
use framegate::display::{FrameSlot, SlotError};
use framegate::frame::Packet;
use framegate::pipeline::{DecoderEvent, EventReceiver, PipelineHealth, event_channel};
use framegate::workers::{PacketSource, Recorder};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::{panic, process};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Video file to decode.")
                .required(true),
        )
        .arg(
            Arg::new("record")
                .short('r')
                .long("record")
                .value_name("FILE")
                .help("Write every decoded frame as raw planes to FILE."),
        )
        .arg(
            Arg::new("no-skip")
                .long("no-skip")
                .help("Wait for the renderer instead of dropping unconsumed frames.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("JSON")
                .help("Load settings from a JSON file; flags override it."),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(path) = matches.get_one::<String>("record") {
        config.record_path = Some(path.into());
    }
    if matches.get_flag("no-skip") {
        config.skip_frames = false;
    }
    let input = matches
        .get_one::<String>("input")
        .cloned()
        .context("missing input")?;

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    let health = Arc::new(PipelineHealth::new());
    if config.log_fps {
        health.fps().start();
    }
    let slot = Arc::new(FrameSlot::new(config.slot_config(), health.clone()));
    let (events, rx) = event_channel();

    let mut decoder: Decoder = Decoder::new(slot.clone(), events.clone());
    if let Some(path) = &config.record_path {
        decoder = decoder.with_sink(Box::new(Recorder::start(path, config.record_queue)?));
    }

    // first signal tears the pipeline down, a second one exits right away
    let interrupt = decoder.interrupt_handle();
    ctrlc::set_handler(move || {
        if interrupt.is_interrupted() {
            process::exit(130);
        }
        interrupt.interrupt();
    })
    .context("Error setting Ctrl-C handler")?;

    let renderer = tokio::spawn(render(slot, rx));

    let decoding = tokio::task::spawn_blocking(move || {
        let result = decode(&mut decoder, &input, &config);
        if let Some(mut sink) = decoder.take_sink()
            && let Err(e) = sink.finish()
        {
            error!("Recording incomplete: {:#}", e);
        }
        decoder.close();
        events.send(DecoderEvent::StreamStopped);
        result
    });

    let result = decoding.await.context("decode task failed")?;
    renderer.await.context("render task failed")?;

    health.fps().stop();
    info!("{}", health.summary());
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

/// Feed the whole input through the decoder, publishing as it goes.
fn decode(decoder: &mut Decoder, input: &str, config: &Config) -> Result<()> {
    let interrupt = decoder.interrupt_handle();
    let mut source = PacketSource::open(input, interrupt.token())?;
    decoder.open(&config.apply_codec_options(source.descriptor()))?;

    loop {
        let packet = match source.next_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(_) if interrupt.is_interrupted() => return Ok(()),
            Err(e) => return Err(e),
        };

        match decoder.push(&packet) {
            Ok(Pushed::Interrupted) => return Ok(()),
            Ok(Pushed::Frame { .. }) => {
                if !drain(decoder) {
                    return Ok(());
                }
            }
            Ok(Pushed::NeedMore) => {}
            // a corrupt packet only costs its own frame
            Err(e) => warn!("Skipping packet: {}", e),
        }
    }

    if interrupt.is_interrupted() {
        return Ok(());
    }
    if let Err(e) = decoder.push(&Packet::end_of_stream()) {
        warn!("Could not flush decoder: {}", e);
    }
    drain(decoder);
    info!("End of input reached");
    Ok(())
}

/// Publish whatever the engine still buffers. Returns false once interrupted.
fn drain(decoder: &mut Decoder) -> bool {
    loop {
        match decoder.drain() {
            Ok(Pushed::Frame { .. }) => {}
            Ok(Pushed::NeedMore) => return true,
            Ok(Pushed::Interrupted) => return false,
            Err(e) => {
                warn!("Dropping buffered frame: {}", e);
                return true;
            }
        }
    }
}

/// Present the latest frame on every notification.
async fn render(slot: Arc<FrameSlot>, mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        match event {
            DecoderEvent::NewFrame => match slot.consume() {
                Ok(frame) => debug!(
                    "Presenting {}x{} {} frame, pts {:?}",
                    frame.width, frame.height, frame.format, frame.pts
                ),
                Err(SlotError::Empty) => {}
                Err(SlotError::Interrupted) => break,
            },
            DecoderEvent::StreamStopped => break,
        }
    }
    debug!("Renderer stopped");
}
