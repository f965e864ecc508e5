use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use robo_mood_core::actuator::{
    spawn_render_loop, ActuatorServer, MoodMirror, RenderHandle, TracingRenderer,
};
use robo_mood_core::client::{MoodClient, PredictionClient};
use robo_mood_core::config::{
    parse_addr, resolve_optional_string, resolve_required_url, resolve_string_with_default,
    resolve_url, ActuatorConfig, CaptureConfig, Env, EyesConfig, PerceptionConfig,
    SerServiceConfig, StdEnv, DEFAULT_ACTUATOR_BIND, DEFAULT_ACTUATOR_URL, DEFAULT_CAPTURE_DIR,
    DEFAULT_CLIP_RETENTION, DEFAULT_CLIP_SECS, DEFAULT_DEBOUNCE_SECS, DEFAULT_FPS,
    DEFAULT_INPUT_DEVICE, DEFAULT_INPUT_FORMAT, DEFAULT_MOOD_FILE, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_SER_BIND, DEFAULT_SER_POLL_SECS, DEFAULT_SER_URL, ENV_ACTUATOR_URL,
    ENV_CAPTURE_DEVICE, ENV_FER_ORACLE_URL, ENV_MOOD_FILE, ENV_SER_ORACLE_URL, ENV_SER_URL,
};
use robo_mood_core::emotion::MoodTrigger;
use robo_mood_core::oracle::HttpFacialOracle;
use robo_mood_core::perception::{PerceptionLoop, StdinFrameSource};
use robo_mood_core::rate_limit::RateLimiter;
use robo_mood_core::util::StopFlag;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "robo-mood")]
#[command(about = "Speech and facial emotion driven robot eyes")]
struct Args {
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record clips, run speech emotion inference and serve the latest result.
    SerServer(SerServerArgs),
    /// Fuse per-frame facial emotion (frames as JSON lines on stdin) with speech
    /// predictions and request mood changes.
    Perception(PerceptionArgs),
    /// Render the eyes and accept mood change requests.
    Actuator(ActuatorArgs),
}

#[derive(ClapArgs, Debug)]
struct SerServerArgs {
    #[arg(long, default_value = DEFAULT_SER_BIND)]
    bind: String,

    /// Speech emotion model endpoint.
    #[arg(long)]
    oracle_url: Option<String>,

    #[arg(long, default_value = DEFAULT_CAPTURE_DIR)]
    capture_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_CLIP_SECS)]
    clip_secs: u64,

    #[arg(long, default_value_t = DEFAULT_CLIP_RETENTION)]
    retention: usize,

    #[arg(long, default_value = DEFAULT_INPUT_FORMAT)]
    input_format: String,

    #[arg(long)]
    device: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct PerceptionArgs {
    #[arg(long)]
    ser_url: Option<String>,

    #[arg(long)]
    actuator_url: Option<String>,

    /// Facial model server exposing /embed and /classify.
    #[arg(long)]
    fer_oracle_url: Option<String>,

    #[arg(long, default_value_t = DEFAULT_SER_POLL_SECS)]
    poll_secs: u64,

    #[arg(long, default_value_t = DEFAULT_DEBOUNCE_SECS)]
    debounce_secs: u64,

    /// Actuator mood file, when it is on this machine.
    #[arg(long)]
    mood_file: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct ActuatorArgs {
    #[arg(long, default_value = DEFAULT_ACTUATOR_BIND)]
    bind: String,

    #[arg(long)]
    mood_file: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    match args.command {
        Command::SerServer(a) => run_ser_server(build_ser_config(a, &env)?).await,
        Command::Perception(a) => run_perception(build_perception_config(a, &env)?).await,
        Command::Actuator(a) => run_actuator(build_actuator_config(a, &env)?).await,
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn wait_for_ctrl_c(stop: StopFlag) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    tracing::info!("shutdown requested");
    stop.stop();
}

#[cfg(feature = "ffmpeg-sidecar")]
async fn run_ser_server(cfg: SerServiceConfig) -> anyhow::Result<()> {
    use robo_mood_core::capture::FfmpegRecorder;
    use robo_mood_core::oracle::HttpSpeechOracle;
    use robo_mood_core::pipeline::SpeechPipeline;

    FfmpegRecorder::ensure_ffmpeg_available().context("ffmpeg is required for recording")?;

    let recorder = FfmpegRecorder::from_config(&cfg.capture);
    let oracle = HttpSpeechOracle::new(cfg.oracle_url.clone())?;
    let pipeline = SpeechPipeline::new(recorder, oracle, cfg.capture.clone());
    let service = pipeline.service();

    let listener = TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;

    tracing::info!(
        bind = %cfg.bind,
        oracle = %cfg.oracle_url,
        clip_secs = cfg.capture.clip_duration.as_secs(),
        "speech service starting"
    );

    let stop = StopFlag::new();
    let pipeline_task = tokio::spawn(pipeline.run(stop.clone()));
    service.serve(listener, wait_for_ctrl_c(stop.clone())).await?;

    stop.stop();
    pipeline_task.await.context("speech pipeline task")??;
    Ok(())
}

#[cfg(not(feature = "ffmpeg-sidecar"))]
async fn run_ser_server(_cfg: SerServiceConfig) -> anyhow::Result<()> {
    anyhow::bail!("ser-server needs the ffmpeg-sidecar feature to record audio")
}

async fn run_perception(cfg: PerceptionConfig) -> anyhow::Result<()> {
    let facial = HttpFacialOracle::new(cfg.fer_oracle_url.clone())?;
    let predictions = PredictionClient::new(&cfg.ser_url)?;
    let moods = MoodClient::new(cfg.actuator_url.clone())?;
    let trigger = MoodTrigger::new(RateLimiter::new(cfg.debounce_interval)?);
    let poll_limiter = RateLimiter::new(cfg.ser_poll_interval)?;

    tracing::info!(
        ser = %cfg.ser_url,
        actuator = %cfg.actuator_url,
        poll_secs = cfg.ser_poll_interval.as_secs(),
        "perception starting"
    );

    let mut perception = PerceptionLoop::new(
        facial,
        predictions,
        moods,
        poll_limiter,
        trigger,
        cfg.mood_file,
    );
    let mut source = StdinFrameSource::stdin();
    let stop = StopFlag::new();

    tokio::select! {
        result = perception.run(&mut source, stop.clone()) => result?,
        () = wait_for_ctrl_c(stop.clone()) => {}
    }
    Ok(())
}

async fn run_actuator(cfg: ActuatorConfig) -> anyhow::Result<()> {
    let mirror = Arc::new(
        MoodMirror::create(&cfg.mood_file)
            .with_context(|| format!("failed to create {}", cfg.mood_file.display()))?,
    );
    let stop = StopFlag::new();
    let RenderHandle { events, thread } = spawn_render_loop(
        cfg.eyes,
        TracingRenderer::default(),
        Arc::clone(&mirror),
        stop.clone(),
    )?;

    let listener = TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;
    tracing::info!(bind = %cfg.bind, mood_file = %cfg.mood_file.display(), "actuator starting");

    ActuatorServer::new(events, Arc::clone(&mirror))
        .serve(listener, wait_for_ctrl_c(stop.clone()))
        .await?;

    stop.stop();
    thread
        .join()
        .map_err(|_| anyhow::anyhow!("render thread panicked"))?;
    Ok(())
}

fn build_ser_config(args: SerServerArgs, env: &impl Env) -> anyhow::Result<SerServiceConfig> {
    let capture = CaptureConfig {
        dir: args.capture_dir,
        clip_duration: Duration::from_secs(args.clip_secs),
        retention: args.retention,
        retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        input_format: args.input_format,
        device: resolve_string_with_default(
            args.device,
            ENV_CAPTURE_DEVICE,
            env,
            DEFAULT_INPUT_DEVICE,
        ),
    }
    .validate()?;

    Ok(SerServiceConfig {
        bind: parse_addr(&args.bind)?,
        oracle_url: resolve_required_url(args.oracle_url, ENV_SER_ORACLE_URL, env)?,
        capture,
    })
}

fn build_perception_config(
    args: PerceptionArgs,
    env: &impl Env,
) -> anyhow::Result<PerceptionConfig> {
    let mood_file = args.mood_file.or_else(|| {
        resolve_optional_string(None, ENV_MOOD_FILE, env).map(PathBuf::from)
    });

    Ok(PerceptionConfig {
        ser_url: resolve_url(args.ser_url, ENV_SER_URL, env, DEFAULT_SER_URL)?,
        actuator_url: resolve_url(args.actuator_url, ENV_ACTUATOR_URL, env, DEFAULT_ACTUATOR_URL)?,
        fer_oracle_url: resolve_required_url(args.fer_oracle_url, ENV_FER_ORACLE_URL, env)?,
        ser_poll_interval: Duration::from_secs(args.poll_secs),
        debounce_interval: Duration::from_secs(args.debounce_secs),
        mood_file,
    }
    .validate()?)
}

fn build_actuator_config(args: ActuatorArgs, env: &impl Env) -> anyhow::Result<ActuatorConfig> {
    let mood_file = match args.mood_file {
        Some(p) => p,
        None => PathBuf::from(resolve_string_with_default(
            None,
            ENV_MOOD_FILE,
            env,
            DEFAULT_MOOD_FILE,
        )),
    };
    let eyes = EyesConfig {
        fps: args.fps,
        ..Default::default()
    }
    .validate()?;

    Ok(ActuatorConfig {
        bind: parse_addr(&args.bind)?,
        mood_file,
        eyes,
    })
}
