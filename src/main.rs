use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use speech_practice::cache::TtlCache;
use speech_practice::config::ServiceConfig;
use speech_practice::constants::DEFAULT_WAVEFORM_RESOLUTION;
use speech_practice::db;
use speech_practice::events::EventEmitter;
use speech_practice::model::AudioFormat;
use speech_practice::queue::{PipelineContext, QueueProcessor};
use speech_practice::storage::FsStorage;
use speech_practice::store::RecordingStore;
use speech_practice::transcribe::{HttpTranscriber, TranscriptionBackend};
use speech_practice::transform;

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio recording and pronunciation analysis pipeline")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline service
    Run {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Render the waveform of a local audio file
    Waveform {
        /// Path to an audio file (mp3, aac, or wav)
        file: PathBuf,

        /// Number of amplitude samples to produce
        #[arg(short, long, default_value_t = DEFAULT_WAVEFORM_RESOLUTION)]
        resolution: usize,

        /// Emit an SVG polyline instead of a JSON array
        #[arg(long)]
        svg: bool,

        /// Stroke color for SVG output (6 hex digits)
        #[arg(long, default_value = "3b82f6")]
        color: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Run { config } => run(config),
        Command::Waveform {
            file,
            resolution,
            svg,
            color,
        } => waveform(file, resolution, svg, color),
    }
}

fn run(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::load(&config_path)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let pool = db::open_database(&config.database_path).await?;
        db::init_database_schema(&pool).await?;
        db::ensure_schema_version(&pool).await?;

        let transcriber: Option<Arc<dyn TranscriptionBackend>> = match &config.transcription {
            Some(transcription) => Some(Arc::new(HttpTranscriber::new(
                transcription.endpoint.clone(),
                Duration::from_secs(config.transcription_timeout_secs),
            )?)),
            None => {
                println!("No transcription backend configured; transcribe steps will be skipped");
                None
            }
        };

        let ctx = Arc::new(PipelineContext {
            store: RecordingStore::new(pool),
            storage: Arc::new(FsStorage::new(&config.storage_dir)),
            transcriber,
            cache: Arc::new(TtlCache::new(config.cache_ttl())),
            events: EventEmitter::default(),
            settings: config.pipeline_settings(),
        });
        let _queue = QueueProcessor::start(ctx.clone(), config.worker_concurrency);

        println!(
            "Pipeline running: {} workers, database {}, storage {}",
            config.worker_concurrency,
            config.database_path.display(),
            config.storage_dir.display()
        );

        // Periodic cache sweep until shutdown.
        let cache = ctx.cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                cache.evict_expired();
            }
        });

        tokio::signal::ctrl_c().await?;
        println!("Shutting down");
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

fn waveform(
    file: PathBuf,
    resolution: usize,
    svg: bool,
    color: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .ok_or("Cannot determine audio format: file has no extension")?;
    let format = AudioFormat::parse(extension)
        .filter(AudioFormat::is_decodable)
        .ok_or_else(|| format!("Unsupported audio format: {}", extension))?;

    let bytes = std::fs::read(&file)
        .map_err(|e| format!("Failed to read '{}': {}", file.display(), e))?;
    let clip = transform::decode_to_mono(&bytes, format)?;
    let samples = transform::generate_waveform(&clip, resolution);

    if svg {
        println!("{}", transform::render_waveform_svg(&samples, &color)?);
    } else {
        println!("{}", serde_json::to_string(&samples)?);
    }
    Ok(())
}
