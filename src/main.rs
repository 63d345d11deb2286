mod cli;

use vttsource::config;
use vttsource_media::boxes::{default_registry, read_boxes, DumpWriter};
use vttsource_media::webvtt::{
    write_init_segment, write_media_segment, SegmentSample, Timestamp, WebVttCue, WebVttSample,
};
use vttsource_mse::{MediaSource, SourceBufferOptions};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

const WVTT_MIME: &str = "text/mp4; codecs=\"wvtt\"";

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vttsource=trace,vttsource_media=trace,vttsource_mse=trace,vttsource_common=debug"
                .to_string()
        } else {
            "vttsource=info,vttsource_media=warn,vttsource_mse=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Dump { file } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            dump_file(&file, &config)
        }
        Commands::Decode { file, json } => decode_sample(&file, json),
        Commands::Encode {
            cues,
            output,
            segment,
            timescale,
        } => encode_cues(&cues, &output, segment, timescale),
        Commands::Replay {
            file,
            chunk,
            offset,
            window_start,
            window_end,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let mut options = config.buffer;
            if let Some(start) = window_start {
                options.append_window_start = start;
            }
            if let Some(end) = window_end {
                options.append_window_end = end;
            }
            replay(&file, options, chunk, offset)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
    }
}

fn read_input(file: &Path) -> Result<Bytes> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }
    let data = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    Ok(Bytes::from(data))
}

fn dump_file(file: &Path, config: &config::Config) -> Result<()> {
    let data = read_input(file)?;
    let boxes = read_boxes(data, default_registry())
        .with_context(|| format!("Failed to parse boxes in {:?}", file))?;

    let mut writer = match config.dump.max_string_len {
        0 => DumpWriter::new(),
        max => DumpWriter::with_max_string_len(max),
    };
    for b in &boxes {
        b.dump_into(&mut writer);
    }
    print!("{}", writer.finish());
    Ok(())
}

fn decode_sample(file: &Path, json: bool) -> Result<()> {
    let data = read_input(file)?;
    let sample = WebVttSample::decode(data)
        .with_context(|| format!("Failed to decode WebVTT sample {:?}", file))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sample.cues)?);
        return Ok(());
    }

    if sample.is_empty() {
        println!("No active cue");
        return Ok(());
    }
    println!("Cues: {}", sample.cues.len());
    for (i, cue) in sample.cues.iter().enumerate() {
        print!("  [{}]", i);
        if let Some(ref id) = cue.id {
            print!(" id={}", id);
        }
        if let Some(ref settings) = cue.settings {
            print!(" settings=\"{}\"", settings);
        }
        println!();
        for line in cue.text().lines() {
            println!("      {}", line);
        }
    }
    Ok(())
}

fn ticks(ms: u64, timescale: u32) -> Result<u32> {
    let ticks = ms * timescale as u64 / 1000;
    u32::try_from(ticks).with_context(|| format!("Duration of {} ms overflows the timescale", ms))
}

/// One sample per cue, with empty samples filling the gaps between cues.
fn cues_to_samples(mut cues: Vec<WebVttCue>, timescale: u32) -> Result<Vec<SegmentSample>> {
    cues.sort_by_key(|c| c.start);
    let mut samples = Vec::with_capacity(cues.len() * 2);
    let mut cursor = Timestamp::ZERO;
    for cue in cues {
        if cue.end <= cue.start {
            anyhow::bail!("Cue '{}' ends at or before its start {}", cue.text(), cue.start);
        }
        if cue.start < cursor {
            anyhow::bail!("Cue '{}' at {} overlaps the previous cue", cue.text(), cue.start);
        }
        if cue.start > cursor {
            samples.push(SegmentSample {
                duration: ticks(cue.start.as_millis() - cursor.as_millis(), timescale)?,
                sample: WebVttSample::default(),
            });
        }
        cursor = cue.end;
        samples.push(SegmentSample {
            duration: ticks(cue.end.as_millis() - cue.start.as_millis(), timescale)?,
            sample: WebVttSample::new(vec![cue]),
        });
    }
    Ok(samples)
}

fn encode_cues(cues_path: &Path, output: &Path, segment: bool, timescale: u32) -> Result<()> {
    let content = std::fs::read_to_string(cues_path)
        .with_context(|| format!("Failed to read cues file: {:?}", cues_path))?;
    let cues: Vec<WebVttCue> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse cues file: {:?}", cues_path))?;
    let count = cues.len();

    let data = if segment {
        if timescale == 0 {
            anyhow::bail!("Timescale cannot be 0");
        }
        let samples = cues_to_samples(cues, timescale)?;
        let mut data = write_init_segment(timescale, "WEBVTT")?.to_vec();
        data.extend_from_slice(&write_media_segment(1, 0, &samples)?);
        data
    } else {
        WebVttSample::new(cues).encode()?.data.to_vec()
    };

    std::fs::write(output, &data).with_context(|| format!("Failed to write {:?}", output))?;
    println!("Wrote {} cues ({} bytes) to {}", count, data.len(), output.display());
    Ok(())
}

fn replay(
    file: &Path,
    options: SourceBufferOptions,
    chunk: Option<usize>,
    offset: Option<f64>,
) -> Result<()> {
    let data = read_input(file)?;
    let mut source = MediaSource::with_options(options).context("Invalid buffer settings")?;
    source.attach()?;
    let id = source.add_source_buffer(WVTT_MIME)?;

    if let Some(offset) = offset {
        if let Some(buffer) = source.source_buffer(id) {
            buffer.set_timestamp_offset(offset)?;
        }
    }

    let chunk = chunk.filter(|&n| n > 0).unwrap_or(data.len().max(1));
    let mut appends = 0;
    for start in (0..data.len()).step_by(chunk) {
        let end = (start + chunk).min(data.len());
        source
            .append(id, data.slice(start..end))
            .with_context(|| format!("Append of bytes {}..{} failed", start, end))?;
        appends += 1;
    }
    tracing::info!("Replayed {} bytes in {} appends", data.len(), appends);

    let Some(buffer) = source.source_buffer(id) else {
        anyhow::bail!("Source buffer disappeared during replay");
    };
    println!("Buffered: {}", buffer.buffered());
    match buffer.highest_end_timestamp() {
        Some(end) => println!("Highest end: {:.3}", end),
        None => println!("Highest end: none"),
    }
    if buffer.is_buffer_full() {
        println!("Buffer full: {} bytes retained", buffer.retained_bytes());
    }

    let samples = buffer.samples();
    println!("Samples: {}", samples.len());
    for s in &samples {
        let texts: Vec<&str> = s.sample.cues.iter().map(WebVttCue::text).collect();
        println!("  [{:.3}, {:.3}) {:?}", s.start, s.end, texts);
    }

    source.end_of_stream()?;
    println!("Duration: {}", source.duration());
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            let warnings = config::validate_config(&config)?;
            println!("✓ Configuration is valid");
            for warning in &warnings {
                println!("  warning: {}", warning);
            }
            print_config(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            print_config(&config::Config::default());
        }
    }

    Ok(())
}

fn print_config(config: &config::Config) {
    match config.buffer.capacity_bytes {
        Some(capacity) => println!("  Buffer capacity: {} bytes", capacity),
        None => println!("  Buffer capacity: unlimited"),
    }
    println!(
        "  Append window: [{}, {})",
        config.buffer.append_window_start, config.buffer.append_window_end
    );
    println!("  Dump string limit: {}", config.dump.max_string_len);
}
