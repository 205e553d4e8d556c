//! Render a preset to a WAV file for offline inspection
//!
//! Plays a short note pattern (or a user-specified note) through the
//! engine with a chosen bank program or preset file and writes the
//! stereo output as 32-bit float WAV.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use js80p::bank::Bank;
use js80p::serializer;
use js80p::synth::Synth;

#[derive(Parser, Debug)]
#[command(name = "render_wav", about = "Render a JS80P preset to a WAV file")]
struct Args {
    /// Output WAV path
    #[arg(short, long, default_value = "render.wav")]
    output: PathBuf,

    /// Preset file to load (a single [js80p] section); overrides --program
    #[arg(short, long)]
    preset: Option<PathBuf>,

    /// Bank program slot to load (0-127)
    #[arg(long, default_value_t = 0)]
    program: usize,

    /// MIDI note to play
    #[arg(short, long, default_value_t = 69)]
    note: u8,

    /// Note velocity (0.0-1.0)
    #[arg(short = 'v', long, default_value_t = 0.8)]
    velocity: f64,

    /// Seconds the note is held
    #[arg(long, default_value_t = 1.0)]
    hold: f64,

    /// Total rendered seconds
    #[arg(short, long, default_value_t = 2.0)]
    duration: f64,

    /// Sample rate
    #[arg(short, long, default_value_t = 44100)]
    sample_rate: u32,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();

    let mut synth = Synth::new();
    synth.suspend();
    synth.set_sample_rate(args.sample_rate as f64);
    synth.set_block_size(256);
    synth.resume();

    match &args.preset {
        Some(path) => {
            let serialized = std::fs::read_to_string(path)?;
            let summary = serializer::import(&mut synth, &serialized);
            info!(
                applied = summary.applied,
                skipped = summary.skipped,
                "loaded preset {}",
                path.display()
            );
        }
        None => {
            let bank = Bank::new();
            let program = bank.program(args.program);
            let summary = serializer::import(&mut synth, program.serialize());
            info!(
                applied = summary.applied,
                skipped = summary.skipped,
                "loaded program {} ({})",
                args.program,
                program.get_name()
            );
        }
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: args.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(&args.output, spec)?;

    let block_size = 256;
    let total_samples = (args.duration * args.sample_rate as f64) as usize;
    let hold_samples = (args.hold * args.sample_rate as f64) as usize;

    synth.note_on(0.0, 0, args.note, args.velocity.clamp(0.0, 1.0));

    let mut rendered = 0;
    let mut round = 0;
    let mut note_is_on = true;

    while rendered < total_samples {
        let sample_count = block_size.min(total_samples - rendered);

        if note_is_on && rendered + sample_count > hold_samples {
            let offset_samples = hold_samples.saturating_sub(rendered);
            synth.note_off(
                offset_samples as f64 / args.sample_rate as f64,
                0,
                args.note,
                0.0,
            );
            note_is_on = false;
        }

        round += 1;
        let buffer = synth.generate_samples(round, sample_count);

        for i in 0..sample_count {
            writer.write_sample(buffer[0][i])?;
            writer.write_sample(buffer[1][i])?;
        }

        rendered += sample_count;
    }

    writer.finalize()?;
    info!("wrote {} ({} samples)", args.output.display(), total_samples);

    Ok(())
}
