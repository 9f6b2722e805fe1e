//! visual-pick - camera-guided pick and place
//!
//! This is the CLI entry point for the visual-pick tool.
//! Run with: cargo run --bin visual-pick -- [--simulate] [--replay FILE] [--listen]
//!     [--overlay FILE.png] [--report FILE.jsonl] [CLASSES]

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use visual_pick::config::known_classes;
use visual_pick::robot::{
    Arm, DisabledGripper, GripperActuator, MotionPrimitive, RobotPose, SimulatedWorld, UrRobot,
};
use visual_pick::vision::{DetectionSource, Overlay, ReplaySource};
use visual_pick::{
    AppSettings, CalibrationConfig, ClassFilter, CommandListener, PickCommand, PickReport,
    Sequencer,
};

/// Upper bound on consecutive picks for `pick all`.
const MAX_PICKS_PER_SESSION: usize = 10;

type Source = Box<dyn DetectionSource + Send>;
type Motion = Box<dyn MotionPrimitive + Send>;
type Gripper = Box<dyn GripperActuator + Send>;
type BoxedSequencer = Sequencer<Source, Motion, Gripper>;

struct Options {
    simulate: bool,
    replay: Option<String>,
    listen: bool,
    save_settings: bool,
    overlay: Option<PathBuf>,
    report: Option<PathBuf>,
    targets: Vec<String>,
}

/// Where each finished run is written.
struct Outputs {
    overlay: Option<(Overlay, PathBuf)>,
    report: Option<PathBuf>,
    calibration: CalibrationConfig,
    tolerance_px: f64,
}

fn parse_args(args: &[String]) -> anyhow::Result<Options> {
    let mut options = Options {
        simulate: false,
        replay: None,
        listen: false,
        save_settings: false,
        overlay: None,
        report: None,
        targets: Vec::new(),
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--simulate" => options.simulate = true,
            "--listen" => options.listen = true,
            "--save-settings" => options.save_settings = true,
            "--replay" => {
                let path = iter.next().context("--replay needs a file path")?;
                options.replay = Some(path.clone());
            }
            "--overlay" => {
                let path = iter.next().context("--overlay needs a file path")?;
                options.overlay = Some(PathBuf::from(path));
            }
            "--report" => {
                let path = iter.next().context("--report needs a file path")?;
                options.report = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => bail!("Unknown option: {}", flag),
            target => options.targets.extend(
                target
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty()),
            ),
        }
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let options = parse_args(&args)?;

    let mut settings = AppSettings::load();
    settings.apply_env();
    if !options.targets.is_empty() {
        settings.target_objects = options.targets.clone();
    }
    if options.save_settings {
        settings.save().map_err(anyhow::Error::msg)?;
        if let Some(path) = AppSettings::settings_path() {
            println!("💾 Settings saved to {}", path.display());
        }
    }

    let calibration = settings.calibration();
    calibration
        .validate()
        .context("Invalid calibration settings")?;

    println!("🤖 Visual Pick - camera-guided pick and place");
    println!("================================================");
    if options.simulate {
        println!("Robot: simulated");
    } else {
        println!("Robot: {}", settings.robot_ip);
    }
    if let Some(ref path) = options.replay {
        println!("Detections: replay from {}", path);
    }
    println!("Targets: {}", settings.target_objects.join(", "));
    println!(
        "Calibration: {:.3} mm/px, invert X={}, invert Y={}",
        calibration.scale_per_pixel, calibration.invert_x, calibration.invert_y
    );
    println!("Auto place: {}", settings.auto_place);
    println!("================================================\n");

    let sequencer = build_sequencer(&settings, &options)?;
    let outputs = build_outputs(&settings, &options)?;

    if options.listen {
        run_listener_mode(sequencer, &settings, &outputs).await
    } else {
        let targets = settings.class_filter();
        run_session(sequencer, targets, false, &outputs).await?;
        Ok(())
    }
}

fn build_outputs(settings: &AppSettings, options: &Options) -> anyhow::Result<Outputs> {
    let overlay = match options.overlay {
        Some(ref path) => {
            let overlay = match settings.overlay_font {
                Some(ref font) => Overlay::new()
                    .with_font_file(font)
                    .with_context(|| format!("Loading font {}", font.display()))?,
                None => Overlay::new(),
            };
            Some((overlay, path.clone()))
        }
        None => None,
    };
    Ok(Outputs {
        overlay,
        report: options.report.clone(),
        calibration: settings.calibration(),
        tolerance_px: settings.tolerance_px,
    })
}

fn build_sequencer(settings: &AppSettings, options: &Options) -> anyhow::Result<BoxedSequencer> {
    let calibration = settings.calibration();
    let config = settings.sequencer();

    let replay: Option<Source> = match options.replay {
        Some(ref path) => Some(Box::new(
            ReplaySource::from_path(path).with_context(|| format!("Loading {}", path))?,
        )),
        None => None,
    };

    let (source, motion, gripper): (Source, Motion, Gripper) = if options.simulate {
        // One object a short distance from home, in front of the camera.
        let home = config.home;
        let label = settings
            .target_objects
            .first()
            .cloned()
            .unwrap_or_else(|| "bottle".to_string());
        let world = SimulatedWorld::new(home, calibration.clone()).with_object(
            label,
            home.x - 40.0,
            home.y + 30.0,
        );
        let source = replay.unwrap_or_else(|| Box::new(world.camera()) as Source);
        (
            source,
            Box::new(world.arm()) as Motion,
            Box::new(world.gripper()) as Gripper,
        )
    } else {
        let Some(source) = replay else {
            bail!("No detection source available: use --replay FILE or --simulate");
        };
        let robot = UrRobot::new(settings.ur_config());
        robot.connect().context("Connecting to robot")?;
        println!("⚠️ No gripper driver configured, gripper commands are skipped");
        (source, Box::new(robot) as Motion, Box::new(DisabledGripper) as Gripper)
    };

    let arm = Arm::with_travel_speed(motion, settings.travel_speed)?;
    Ok(Sequencer::new(source, arm, gripper, calibration, config))
}

/// Pick one object (or, with `repeat`, keep picking until nothing is left).
async fn run_session(
    mut sequencer: BoxedSequencer,
    targets: ClassFilter,
    repeat: bool,
    outputs: &Outputs,
) -> anyhow::Result<BoxedSequencer> {
    let rounds = if repeat { MAX_PICKS_PER_SESSION } else { 1 };
    for _ in 0..rounds {
        let targets = targets.clone();
        let (returned, report) = tokio::task::spawn_blocking(move || {
            let report = pick_with_search(&mut sequencer, &targets);
            (sequencer, report)
        })
        .await?;
        sequencer = returned;

        print_report(&report);
        write_outputs(&report, outputs);
        if !report.is_success() {
            break;
        }
    }
    Ok(sequencer)
}

/// Pick from home; if the object drops out of view, sweep the table once and retry.
fn pick_with_search(sequencer: &mut BoxedSequencer, targets: &ClassFilter) -> PickReport {
    if let Err(e) = sequencer.go_home() {
        tracing::warn!("Could not reach home before picking: {}", e);
    }
    let report = sequencer.pick_and_place(targets, None);
    if !report.needs_search() {
        return report;
    }

    println!("🔍 Object not in view, searching the table...");
    match sequencer.search(targets) {
        Ok(Some(_)) => sequencer.pick_and_place(targets, None),
        Ok(None) => {
            println!("⚠️ Search complete - no objects found");
            report
        }
        Err(e) => {
            eprintln!("❌ Search failed: {}", e);
            report
        }
    }
}

fn write_outputs(report: &PickReport, outputs: &Outputs) {
    if let (Some((overlay, path)), Some(detection)) = (&outputs.overlay, &report.detection) {
        match overlay.save_snapshot(
            path,
            std::slice::from_ref(detection),
            &outputs.calibration,
            outputs.tolerance_px,
        ) {
            Ok(()) => println!("🖼️ Overlay saved to {}", path.display()),
            Err(e) => eprintln!("⚠️ Could not save overlay: {}", e),
        }
    }
    if let Some(path) = &outputs.report {
        if let Err(e) = append_report(path, report) {
            eprintln!("⚠️ Could not write report: {:#}", e);
        }
    }
}

/// Append the report as one JSON line.
fn append_report(path: &Path, report: &PickReport) -> anyhow::Result<()> {
    let line = serde_json::to_string(report)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Opening {}", path.display()))?;
    writeln!(file, "{}", line)?;
    Ok(())
}

async fn run_listener_mode(
    mut sequencer: BoxedSequencer,
    settings: &AppSettings,
    outputs: &Outputs,
) -> anyhow::Result<()> {
    let listener = CommandListener::bind(settings.listener_addr.as_str()).await?;
    println!("👂 Listening for commands on {}", listener.local_addr()?);
    println!("Commands: pick <class>[, <class>...] | pick all | home | stop\n");

    let (tx, mut rx) = mpsc::channel::<PickCommand>(16);
    let server = tokio::spawn(listener.run(tx));

    loop {
        let command = tokio::select! {
            command = rx.recv() => command,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted");
                break;
            }
        };

        match command {
            Some(PickCommand::Pick(classes)) => {
                sequencer = run_session(sequencer, ClassFilter::new(&classes), false, outputs).await?;
            }
            Some(PickCommand::PickAll) => {
                sequencer =
                    run_session(sequencer, ClassFilter::new(known_classes()), true, outputs).await?;
            }
            Some(PickCommand::Home) => {
                let (returned, result) = tokio::task::spawn_blocking(move || {
                    let result = sequencer.go_home();
                    (sequencer, result)
                })
                .await?;
                sequencer = returned;
                match result {
                    Ok(()) => println!("🏠 At home position"),
                    Err(e) => eprintln!("❌ Home failed: {}", e),
                }
            }
            Some(PickCommand::Stop) | None => break,
        }
    }

    server.abort();
    println!("Goodbye! 👋");
    Ok(())
}

fn print_report(report: &PickReport) {
    let object = report.object.as_deref().unwrap_or("object");
    if report.is_success() {
        println!(
            "\n✅ {} picked in {} centering steps (run {})",
            object, report.attempts_used, report.run_id
        );
        if let Some(target) = report.placed_at {
            println!("📦 Placed at ({:.1}mm, {:.1}mm)", target.x, target.y);
        }
    } else {
        let reason = report
            .failure
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("\n❌ Pick failed: {} (run {})", reason, report.run_id);
    }
    if let Some(RobotPose { x, y, z }) = report.final_pose {
        println!("   Final pose: ({:.1}, {:.1}, {:.1})", x, y, z);
    }
}
