use sera_geom::{Grid, LenExt as _, RigConfigBuilder};
use sera_planner::{TourPlan, TourTiming};

#[derive(clap::Parser)]
struct Args {
    /// Cruising speed, in cm/s.
    #[arg(long, default_value_t = 8.0)]
    speed: f32,

    /// Use a uniform grid with this many rows instead of the plant grid.
    #[arg(long, requires = "cols")]
    rows: Option<usize>,

    #[arg(long, requires = "rows")]
    cols: Option<usize>,

    #[arg(long, default_value_t = 45.0)]
    width: f32,

    #[arg(long, default_value_t = 63.0)]
    height: f32,
}

pub fn main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();

    let rig = RigConfigBuilder::default()
        .with_width(args.width.cm())
        .with_height(args.height.cm())
        .build();
    let grid = match (args.rows, args.cols) {
        (Some(rows), Some(cols)) => Grid::uniform(&rig, rows, cols),
        _ => Grid::plant(),
    };
    let home = rig.default_home();
    let plan = TourPlan::zigzag(&grid);
    let schedule = plan.schedule(&grid, home, home, args.speed, &TourTiming::default())?;

    for step in &schedule.steps {
        eprintln!(
            "step {:2}: cell {:2} at ({:5.1}, {:5.1}), {:5.1}cm, wait {:.1}s",
            step.step + 1,
            step.cell + 1,
            step.target.x,
            step.target.y,
            step.distance,
            (step.settle + step.row_pause).as_secs_f32(),
        );
    }
    eprintln!("total: {:.1}s", schedule.total().as_secs_f32());

    println!("{}", serde_json::to_string_pretty(&schedule)?);
    Ok(())
}
