//! Glim CLI - Command-line interface for Glim Flux
//!
//! Commands:
//! - replay: Feed a recorded EDA capture (and optional HR log) through the pipeline
//! - classify: One-shot classification of an EDA/HR pair
//! - encode-batch: Convert `timestamp,value` lines into upload JSON
//! - decode-batch: Convert upload JSON back into `timestamp,value` lines

use clap::{Parser, Subcommand};
use log::{info, warn};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use glim_flux::buffer::{BatchSample, FrozenBatch};
use glim_flux::upload::{UploadError, UploadPayload};
use glim_flux::{
    classify, ArousalReading, Baseline, GlimError, GlimPipeline, HrSample, PipelineConfig,
    GLIM_VERSION, PRODUCER_NAME,
};

/// Glim - Real-time arousal estimation from EDA and heart rate
#[derive(Parser)]
#[command(name = "glim")]
#[command(author = "Synheart AI Inc")]
#[command(version = GLIM_VERSION)]
#[command(about = "Classify arousal from EDA and heart-rate streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded EDA capture through the pipeline
    Replay {
        /// EDA capture file (use - for stdin)
        #[arg(long)]
        eda: PathBuf,

        /// HR log with one `heart_rate,instant_speed` pair per line
        #[arg(long)]
        hr: Option<PathBuf>,

        /// Pipeline configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bytes fed to the decoder per read
        #[arg(long, default_value = "64")]
        chunk: usize,

        /// Upload the partial batch left at the end of the capture
        #[arg(long)]
        flush: bool,
    },

    /// Classify one EDA/HR pair against a baseline
    Classify {
        /// EDA value (microsiemens)
        #[arg(long)]
        eda: f32,

        /// Heart rate (beats/min)
        #[arg(long)]
        hr: f32,

        /// Baseline EDA
        #[arg(long, default_value = "1.5")]
        base_eda: f32,

        /// Baseline heart rate
        #[arg(long, default_value = "80")]
        base_hr: f32,
    },

    /// Encode `timestamp,value` lines as an upload payload
    EncodeBatch {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Decode an upload payload into `timestamp,value` lines
    DecodeBatch {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), GlimCliError> {
    match cli.command {
        Commands::Replay {
            eda,
            hr,
            config,
            chunk,
            flush,
        } => cmd_replay(&eda, hr.as_deref(), config.as_deref(), chunk, flush),
        Commands::Classify {
            eda,
            hr,
            base_eda,
            base_hr,
        } => cmd_classify(eda, hr, base_eda, base_hr),
        Commands::EncodeBatch { input } => cmd_encode_batch(&input),
        Commands::DecodeBatch { input } => cmd_decode_batch(&input),
    }
}

fn read_input_bytes(path: &Path) -> Result<Vec<u8>, GlimCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read(path)?)
    }
}

fn read_input(path: &Path) -> Result<String, GlimCliError> {
    String::from_utf8(read_input_bytes(path)?)
        .map_err(|e| GlimCliError::ParseError(format!("Input is not UTF-8: {}", e)))
}

fn parse_hr_log(text: &str) -> Result<Vec<HrSample>, GlimCliError> {
    let mut samples = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let parse = |field: Option<&str>| -> Result<f32, GlimCliError> {
            field
                .and_then(|f| f.parse::<f32>().ok())
                .ok_or_else(|| {
                    GlimCliError::ParseError(format!("HR log line {}: {:?}", line_no + 1, line))
                })
        };
        let heart_rate = parse(fields.next())?;
        let instant_speed = match fields.next() {
            Some(f) => parse(Some(f))?,
            None => 0.0,
        };
        samples.push(HrSample::new(heart_rate, instant_speed));
    }
    Ok(samples)
}

fn cmd_replay(
    eda: &Path,
    hr: Option<&Path>,
    config: Option<&Path>,
    chunk: usize,
    flush: bool,
) -> Result<(), GlimCliError> {
    let config = match config {
        Some(path) => PipelineConfig::from_json(&fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };

    let capture = read_input_bytes(eda)?;
    if capture.is_empty() {
        return Err(GlimCliError::NoData);
    }
    let hr_samples = match hr {
        Some(path) => parse_hr_log(&fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    let sink = |payload: &UploadPayload| -> Result<(), UploadError> {
        info!("upload {:?}: {}", payload.kind(), payload.to_json());
        Ok(())
    };
    let pipeline = GlimPipeline::with_upload_sink(config, sink)?;
    pipeline.add_display(|reading: &ArousalReading| {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        match serde_json::to_string(reading) {
            Ok(line) => {
                if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
                    warn!("Failed to write reading: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode reading: {}", e),
        }
    });

    info!(
        "{} {} replaying {} bytes, {} HR samples",
        PRODUCER_NAME,
        GLIM_VERSION,
        capture.len(),
        hr_samples.len()
    );

    // One HR packet per EDA chunk, then whatever HR is left over
    let mut hr_iter = hr_samples.into_iter();
    for bytes in capture.chunks(chunk.max(1)) {
        pipeline.ingest_eda(bytes);
        if let Some(sample) = hr_iter.next() {
            pipeline.on_hr_sample(sample);
        }
    }
    for sample in hr_iter {
        pipeline.on_hr_sample(sample);
    }

    if flush {
        pipeline.flush_pending();
    }
    let summary = pipeline.eda_summary();
    let uploads = pipeline.close()?;

    eprintln!(
        "{}",
        serde_json::json!({
            "eda": summary,
            "hr_packets": pipeline.hr().packets(),
            "uploads": uploads,
        })
    );
    Ok(())
}

fn cmd_classify(eda: f32, hr: f32, base_eda: f32, base_hr: f32) -> Result<(), GlimCliError> {
    let baseline = Baseline::new(base_eda, base_hr)?;
    let classification = classify(eda, hr, &baseline);
    println!("{}", serde_json::to_string_pretty(&classification)?);
    Ok(())
}

fn cmd_encode_batch(input: &Path) -> Result<(), GlimCliError> {
    let text = read_input(input)?;
    let mut samples = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (ts, value) = line
            .split_once(',')
            .ok_or_else(|| GlimCliError::ParseError(format!("Expected timestamp,value: {:?}", line)))?;
        let timestamp_ms = ts
            .trim()
            .parse::<i64>()
            .map_err(|e| GlimCliError::ParseError(format!("Bad timestamp {:?}: {}", ts, e)))?;
        samples.push(BatchSample::new(timestamp_ms, value.trim()));
    }

    if samples.is_empty() {
        return Err(GlimCliError::NoData);
    }

    let payload = UploadPayload::Data(FrozenBatch::new(samples));
    println!("{}", payload.to_json());
    Ok(())
}

fn cmd_decode_batch(input: &Path) -> Result<(), GlimCliError> {
    let text = read_input(input)?;
    match UploadPayload::from_json(text.trim())? {
        UploadPayload::Data(batch) => {
            for sample in batch.samples {
                println!("{},{}", sample.timestamp_ms, sample.value);
            }
        }
        UploadPayload::Annotation { timestamp_ms } => {
            println!("annotation,{}", timestamp_ms);
        }
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum GlimCliError {
    Io(io::Error),
    Pipeline(GlimError),
    Json(serde_json::Error),
    NoData,
    ParseError(String),
}

impl From<io::Error> for GlimCliError {
    fn from(e: io::Error) -> Self {
        GlimCliError::Io(e)
    }
}

impl From<GlimError> for GlimCliError {
    fn from(e: GlimError) -> Self {
        GlimCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for GlimCliError {
    fn from(e: serde_json::Error) -> Self {
        GlimCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<GlimCliError> for CliError {
    fn from(e: GlimCliError) -> Self {
        match e {
            GlimCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GlimCliError::Pipeline(GlimError::InvalidConfig(msg)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: msg,
                hint: Some("Baselines must be finite and non-zero".to_string()),
            },
            GlimCliError::Pipeline(e) => CliError {
                code: "PIPELINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            GlimCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            GlimCliError::NoData => CliError {
                code: "NO_DATA".to_string(),
                message: "No samples found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            GlimCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}
