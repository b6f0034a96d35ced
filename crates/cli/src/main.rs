use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use segmentation::{encode_png, AffinityLoader, OverlayController, PointLabel, SegmentWorker};
use storyboard::{
    save_original, save_panel, EditorConfig, FileSessionStore, HttpRegenerationClient, ImageRef,
    Intake, RegenerationClient, RegenerationRequest, SessionBridge, Storyboard,
    StoryboardPayload,
};

#[derive(Parser)]
#[command(name = "nemu-cli")]
#[command(about = "Nemu storyboard editor CLI - headless layout, segmentation and export")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Session directory root (defaults to the app data dir)
    #[arg(long, global = true)]
    session_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a storyboard payload in a new session, as the create flow does
    Stage {
        /// JSON payload file
        payload: PathBuf,
    },

    /// Validate a session's storyboard and print its layout
    Inspect {
        /// Session id printed by `stage`
        #[arg(short, long)]
        session: Uuid,

        /// Display scale (defaults to the configured one)
        #[arg(long)]
        scale: Option<f32>,
    },

    /// Segment an image from point prompts and write the mask overlay
    Segment {
        /// Image file, URL, data URL or base64
        #[arg(short, long)]
        image: String,

        /// Point prompt `x,y` or `x,y,exclude` in normalized coordinates
        #[arg(short, long = "point", required = true)]
        points: Vec<PointArg>,

        /// Output PNG for the overlay raster
        #[arg(short, long)]
        output: PathBuf,

        /// JSON model file (defaults to the configured one)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long, default_value = "120")]
        timeout: u64,
    },

    /// Save panel images and the original composite from a session
    Export {
        #[arg(short, long)]
        session: Uuid,

        /// 1-based panel number; all panels when omitted
        #[arg(short, long)]
        panel: Option<usize>,

        /// Also save original_image.png
        #[arg(long)]
        original: bool,

        /// Target directory (defaults to the download dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Send a regeneration request for one panel
    Regenerate {
        /// 1-based panel number
        #[arg(short, long)]
        panel: usize,

        /// Panel image
        #[arg(short, long)]
        image: String,

        /// Mask PNG
        #[arg(short, long)]
        mask: PathBuf,

        /// Edit instruction
        #[arg(long)]
        prompt: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct PointArg {
    x: f32,
    y: f32,
    label: PointLabel,
}

impl FromStr for PointArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let (x, y, label) = match parts.as_slice() {
            [x, y] => (*x, *y, PointLabel::Include),
            [x, y, "include" | "1"] => (*x, *y, PointLabel::Include),
            [x, y, "exclude" | "0"] => (*x, *y, PointLabel::Exclude),
            _ => return Err(format!("expected x,y[,include|exclude], got {s:?}")),
        };
        let parse = |v: &str| -> std::result::Result<f32, String> {
            let f: f32 = v.parse().map_err(|_| format!("{v:?} is not a number"))?;
            if (0.0..=1.0).contains(&f) {
                Ok(f)
            } else {
                Err(format!("{f} is outside [0, 1]"))
            }
        };
        Ok(PointArg {
            x: parse(x)?,
            y: parse(y)?,
            label,
        })
    }
}

#[derive(Serialize)]
struct PanelSummary {
    panel: usize,
    source: String,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = EditorConfig::load().context("load editor config")?;
    let session_root = cli
        .session_root
        .unwrap_or_else(FileSessionStore::sessions_root);

    match cli.command {
        Commands::Stage { payload } => stage_command(&session_root, &payload),
        Commands::Inspect { session, scale } => {
            inspect_command(&session_root, session, scale.unwrap_or(config.display_scale))
        }
        Commands::Segment {
            image,
            points,
            output,
            model,
            timeout,
        } => segment_command(
            &config,
            &image,
            &points,
            &output,
            model.or_else(|| config.model_path.clone()),
            Duration::from_secs(timeout),
        ),
        Commands::Export {
            session,
            panel,
            original,
            output,
        } => export_command(
            &session_root,
            session,
            panel,
            original,
            output.unwrap_or_else(|| config.download_dir()),
        ),
        Commands::Regenerate {
            panel,
            image,
            mask,
            prompt,
        } => regenerate_command(&config, panel, &image, &mask, &prompt),
    }
}

fn load_storyboard(root: &Path, session: Uuid) -> Result<Storyboard> {
    let store = FileSessionStore::open_in(root, session)
        .with_context(|| format!("open session {session}"))?;
    match SessionBridge::intake(&store) {
        Intake::Ready(storyboard) => Ok(storyboard),
        Intake::Redirect(err) => Err(anyhow::Error::new(err).context(format!(
            "session {session} has no usable storyboard; create one first"
        ))),
    }
}

fn stage_command(root: &Path, payload_path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(payload_path)
        .with_context(|| format!("read {}", payload_path.display()))?;
    let payload = StoryboardPayload::from_json(&json).context("parse storyboard payload")?;
    payload.validate().context("validate storyboard payload")?;

    let store = FileSessionStore::create_in(root).context("create session")?;
    SessionBridge::stage(&store, &payload).context("write session payload")?;
    info!(session = %store.id(), panels = payload.panels.len(), "storyboard staged");
    println!("{}", store.id());
    Ok(())
}

fn inspect_command(root: &Path, session: Uuid, scale: f32) -> Result<()> {
    let storyboard = load_storyboard(root, session)?;
    let surface = storyboard.layout_surface(scale);
    let container = surface.container_size();
    info!(
        panels = storyboard.panel_count(),
        container_w = container.x,
        container_h = container.y,
        "storyboard is valid"
    );

    let summary: Vec<PanelSummary> = surface
        .panel_views()
        .iter()
        .map(|view| PanelSummary {
            panel: view.index + 1,
            source: storyboard.panels[view.index].to_string(),
            x: view.rect.x,
            y: view.rect.y,
            width: view.rect.width,
            height: view.rect.height,
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn segment_command(
    config: &EditorConfig,
    image: &str,
    points: &[PointArg],
    output: &Path,
    model: Option<PathBuf>,
    timeout: Duration,
) -> Result<()> {
    let bytes = ImageRef::parse(image)
        .and_then(|r| r.bytes())
        .with_context(|| format!("load image {image}"))?;

    let spawner = move || SegmentWorker::spawn(AffinityLoader::new(model.clone()));
    let mut overlay = OverlayController::open(0, bytes, &spawner)
        .context("start segmentation worker")?
        .with_mask_color(config.mask_color);

    let deadline = Instant::now() + timeout;
    pump_until(&mut overlay, deadline, |o| o.is_encoded())?;
    for p in points {
        overlay
            .add_point([p.x, p.y], p.label)
            .context("add point prompt")?;
    }
    pump_until(&mut overlay, deadline, |o| {
        !o.is_decoding() && !o.has_pending_decode()
    })?;

    let raster = overlay
        .overlay()
        .ok_or_else(|| anyhow!("worker returned no mask"))?;
    let png = encode_png(raster).context("encode mask overlay")?;
    std::fs::write(output, png).with_context(|| format!("write {}", output.display()))?;
    info!(
        output = %output.display(),
        score = overlay.score().unwrap_or_default(),
        "mask written"
    );
    overlay.close();
    Ok(())
}

fn pump_until(
    overlay: &mut OverlayController,
    deadline: Instant,
    done: impl Fn(&OverlayController) -> bool,
) -> Result<()> {
    let mut last_status = String::new();
    while !done(overlay) {
        if Instant::now() > deadline {
            bail!("timed out: {}", overlay.status());
        }
        if overlay.pump() == 0 {
            thread::sleep(Duration::from_millis(10));
        }
        if overlay.status() != last_status {
            last_status = overlay.status().to_string();
            debug!(status = %last_status, "segmentation");
        }
        if overlay.status().starts_with("Error") {
            bail!("{}", overlay.status());
        }
    }
    Ok(())
}

fn export_command(
    root: &Path,
    session: Uuid,
    panel: Option<usize>,
    original: bool,
    out_dir: PathBuf,
) -> Result<()> {
    let storyboard = load_storyboard(root, session)?;
    let indices: Vec<usize> = match panel {
        Some(0) => bail!("panel numbers start at 1"),
        Some(n) if n > storyboard.panel_count() => {
            bail!("panel {n} does not exist ({} panels)", storyboard.panel_count())
        }
        Some(n) => vec![n - 1],
        None => (0..storyboard.panel_count()).collect(),
    };

    for index in indices {
        let path = save_panel(&out_dir, index, &storyboard.panels[index])
            .with_context(|| format!("save panel {}", index + 1))?;
        println!("{}", path.display());
    }
    if original {
        let path =
            save_original(&out_dir, &storyboard.original).context("save original image")?;
        println!("{}", path.display());
    }
    Ok(())
}

fn regenerate_command(
    config: &EditorConfig,
    panel: usize,
    image: &str,
    mask: &Path,
    prompt: &str,
) -> Result<()> {
    if panel == 0 {
        bail!("panel numbers start at 1");
    }
    if prompt.trim().is_empty() {
        bail!("an edit prompt is required");
    }
    let image_bytes = ImageRef::parse(image)
        .and_then(|r| r.bytes())
        .with_context(|| format!("load image {image}"))?;
    let mask_bytes = std::fs::read(mask).with_context(|| format!("read {}", mask.display()))?;
    if !storyboard::is_png(&mask_bytes) {
        warn!(mask = %mask.display(), "mask is not a PNG file");
    }

    let client = HttpRegenerationClient::from_config(config);
    let request = RegenerationRequest::new(panel - 1, &image_bytes, &mask_bytes, prompt.trim());
    let response = client
        .regenerate(&request)
        .with_context(|| format!("regenerate panel {panel} via {}", client.endpoint()))?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_arg_parsing() {
        let p: PointArg = "0.5,0.25".parse().unwrap();
        assert_eq!((p.x, p.y, p.label), (0.5, 0.25, PointLabel::Include));
        let p: PointArg = "0.1, 0.9, exclude".parse().unwrap();
        assert_eq!(p.label, PointLabel::Exclude);
        assert!("1.5,0.2".parse::<PointArg>().is_err());
        assert!("0.5".parse::<PointArg>().is_err());
        assert!("0.5,0.5,maybe".parse::<PointArg>().is_err());
    }

    #[test]
    fn test_cli_parses_segment_points() {
        let cli = Cli::try_parse_from([
            "nemu-cli", "segment", "-i", "panel.png", "-p", "0.5,0.5", "-p", "0.2,0.2,exclude",
            "-o", "mask.png",
        ])
        .unwrap();
        match cli.command {
            Commands::Segment { points, timeout, .. } => {
                assert_eq!(points.len(), 2);
                assert_eq!(timeout, 120);
            }
            _ => panic!("expected segment"),
        }
    }
}
