use argh::FromArgs;
use std::path::PathBuf;

use solvekit::compile::{get_root_frames_from_markers, Collection, Solver};
use solvekit::exec::{
    average_frame_error, max_frame_error, merge_frame_error_list, merge_frame_list,
    ExecuteOptions, Executor, ValidateMode,
};
use solvekit::scene::{Frame, Scene};

#[derive(FromArgs, Debug)]
/// Compile a solver collection and run it against a scene file
struct Args {
    /// path to the scene JSON file
    #[argh(option, short = 's')]
    scene: PathBuf,

    /// path to the collection JSON file
    #[argh(option, short = 'c')]
    collection: PathBuf,

    /// where to write the solved scene
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// only print the compiled actions
    #[argh(switch)]
    dry_run: bool,

    /// replace the root frames of standard solvers with automatic ones
    #[argh(switch)]
    auto_root_frames: bool,

    /// minimum frames per marker for automatic root frames
    #[argh(option, default = "2")]
    min_frames: usize,

    /// first frame for automatic root frames
    #[argh(option, default = "1")]
    start: i32,

    /// last frame for automatic root frames
    #[argh(option, default = "100")]
    end: i32,

    /// validate each action just before it runs
    #[argh(switch)]
    validate_at_runtime: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut scene = Scene::load(&args.scene)?;
    let mut collection = Collection::load(&args.collection)?;

    if args.auto_root_frames {
        let frames = get_root_frames_from_markers(
            &scene,
            &collection.markers,
            args.min_frames,
            args.start,
            args.end,
        );
        log::info!("Automatic root frames: {frames:?}");
        for solver in collection.solvers.iter_mut() {
            if let Solver::Standard(sol) = solver {
                sol.root_frame_list_mut()
                    .set(frames.iter().copied().map(Frame::new))?;
            }
        }
    }

    if args.dry_run {
        let (actions, _) = collection.compile(&scene, false)?;
        for action in actions {
            println!("{}", serde_json::to_string(&action)?);
        }
        return Ok(());
    }

    let validate_mode = if args.validate_at_runtime {
        ValidateMode::AtRuntime
    } else {
        ValidateMode::PreValidate
    };
    let executor = Executor::new().with_options(ExecuteOptions {
        validate_mode,
        ..Default::default()
    });

    // stop between actions on Ctrl-C
    let ctx = executor.context().clone();
    ctrlc::set_handler(move || ctx.request_interrupt())?;

    let results = executor.execute_collection(&mut scene, &collection)?;

    let frame_errors = merge_frame_error_list(&results);
    let (worst_frame, worst_error) = max_frame_error(&frame_errors);
    println!("solves: {}", results.len());
    println!("frames: {:?}", merge_frame_list(&results));
    println!("average error: {:.6}", average_frame_error(&frame_errors));
    match worst_frame {
        Some(frame) => println!("max error: {worst_error:.6} at frame {frame}"),
        None => println!("max error: {worst_error:.6}"),
    }

    if let Some(output) = args.output {
        scene.save(&output)?;
        log::info!("Saved scene to {}", output.display());
    }

    Ok(())
}
