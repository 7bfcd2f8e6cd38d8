use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use zapata::{
    config::MeshConfig,
    error::{ZapataError, USAGE_EXIT_CODE},
    mesher,
    pipeline::{self, StageError, TranslateOptions},
};

/// Footing and soil mesh translator for OpenSees
#[derive(Parser)]
#[command(name = "zapata")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Translate footing/soil meshes into OpenSees input scripts", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); overrides RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a .msh or .vtu mesh into nodes, elements and materials scripts
    Translate(TranslateArgs),
    /// Generate a mesh from a configuration file with Gmsh
    Mesh(MeshArgs),
    /// Validate a configuration file and print a summary
    Config {
        /// Configuration JSON
        file: PathBuf,
    },
}

#[derive(Args)]
struct TranslateArgs {
    /// Input mesh (.msh or .vtu)
    input: PathBuf,

    /// Directory receiving the generated scripts
    #[arg(short, long, default_value = "opensees_input")]
    output_dir: PathBuf,

    /// Coincidence tolerance for node fusion
    #[arg(long)]
    tolerance: Option<f64>,

    /// Largest admissible fraction of degenerate elements
    #[arg(long)]
    max_reject_fraction: Option<f64>,

    /// Relative volume threshold for degenerate elements
    #[arg(long)]
    degeneracy_ratio: Option<f64>,

    /// Configuration JSON with the region to material mapping
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep the node order of inverted elements
    #[arg(long)]
    keep_orientation: bool,

    /// Also write the fused mesh as mesh_fused.vtu
    #[arg(long)]
    vtu: bool,
}

#[derive(Args)]
struct MeshArgs {
    /// Configuration JSON
    #[arg(short, long)]
    config: PathBuf,

    /// Output mesh, or .geo script with --geo-only
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Gmsh executable
    #[arg(long, default_value = "gmsh")]
    gmsh: PathBuf,

    /// Only write the .geo script
    #[arg(long)]
    geo_only: bool,
}

fn init_logging(level: Option<&str>) {
    let mut builder = match level {
        Some(level) => {
            let mut builder = env_logger::Builder::new();
            builder.parse_filters(level);
            builder
        }
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        }
    };
    builder.format_timestamp(None).init();
}

fn translate(args: TranslateArgs) -> Result<(), i32> {
    let config = match &args.config {
        Some(path) => Some(pipeline::load_config(path).map_err(report_stage)?),
        None => None,
    };

    let mut options = TranslateOptions::new(config.as_ref());
    if let Some(tolerance) = args.tolerance {
        options.translation.tolerance = tolerance;
    }
    if let Some(fraction) = args.max_reject_fraction {
        options.translation.max_reject_fraction = fraction;
    }
    if let Some(ratio) = args.degeneracy_ratio {
        options.translation.degeneracy_ratio = ratio;
    }
    if args.keep_orientation {
        options.translation.reorient = false;
    }
    options.fused_vtu = args.vtu;

    pipeline::translate(&args.input, &args.output_dir, &options)
        .map(|_| ())
        .map_err(report_stage)
}

fn mesh(args: MeshArgs) -> Result<(), i32> {
    let config = MeshConfig::load(&args.config).map_err(report)?;
    config.log_summary();

    if args.geo_only {
        let output = args.output.unwrap_or_else(|| PathBuf::from("model.geo"));
        return mesher::write_geo(&config, &output).map_err(report);
    }
    let output = args.output.unwrap_or_else(|| PathBuf::from("model.msh"));
    mesher::compute_mesh(&config, &args.gmsh, &output)
        .map(|_| ())
        .map_err(report)
}

fn show_config(file: &Path) -> Result<(), i32> {
    let config = MeshConfig::load(file).map_err(report)?;
    config.log_summary();
    Ok(())
}

fn report(err: ZapataError) -> i32 {
    eprintln!("error: {err}");
    err.exit_code()
}

fn report_stage(err: StageError) -> i32 {
    eprintln!("error: {err}");
    err.exit_code()
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // help and version requests are not errors
            std::process::exit(if err.use_stderr() { USAGE_EXIT_CODE } else { 0 });
        }
    };
    init_logging(cli.log_level.as_deref());

    let result = match cli.command {
        Commands::Translate(args) => translate(args),
        Commands::Mesh(args) => mesh(args),
        Commands::Config { file } => show_config(&file),
    };

    if let Err(code) = result {
        std::process::exit(code);
    }
}
