//! Command-line interface for the image codec tool.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::{self, BatchConverter};
use crate::codec::ImageFormat;
use crate::config::EncodeParameters;
use crate::imaging;
use crate::metadata::ImageInfo;

/// Image codec tool
///
/// Identify, inspect and convert raster images between PNG, GIF, TIFF,
/// JPEG (read only), BMP, ICO, PSD (read only), PCX, DCX, PNM, TGA, WBMP,
/// XBM and XPM.
#[derive(Parser, Debug)]
#[command(name = "pixelcodec")]
#[command(version)]
#[command(about = "Identify, inspect and convert raster images")]
#[command(long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the detected format of a file
    Identify {
        /// Input file path
        input: PathBuf,
    },

    /// Show header information about an image
    Info {
        /// Input file path
        input: PathBuf,

        /// Print the information as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert one image to another format
    Convert {
        /// Input file path
        input: PathBuf,

        /// Output file path
        output: PathBuf,

        /// Output format; defaults to the output file extension
        #[arg(short, long, value_parser = parse_format)]
        format: Option<ImageFormat>,

        /// TOML file with encode parameters
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Allow lossy color reduction
        #[arg(long)]
        lossy: bool,
    },

    /// Convert every image in a directory
    Batch {
        /// Input directory
        input: PathBuf,

        /// Output format
        #[arg(short, long, value_parser = parse_format)]
        to: ImageFormat,

        /// Output directory; defaults to next to each source
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Number of parallel jobs
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Scan subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// TOML file with encode parameters
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Allow lossy color reduction
        #[arg(long)]
        lossy: bool,
    },
}

/// Parse a format name or extension such as `png`, `tif` or `jpeg`.
pub fn parse_format(name: &str) -> std::result::Result<ImageFormat, String> {
    ImageFormat::from_extension(name)
        .or_else(|| ImageFormat::ALL.into_iter().find(|f| f.name().eq_ignore_ascii_case(name)))
        .ok_or_else(|| format!("unknown image format '{}'", name))
}

/// Run the CLI application.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Identify { input } => run_identify(&input),
        Commands::Info { input, json } => run_info(&input, json, cli.quiet),
        Commands::Convert {
            input,
            output,
            format,
            params,
            lossy,
        } => run_convert(&input, &output, format, params.as_deref(), lossy),
        Commands::Batch {
            input,
            to,
            out_dir,
            jobs,
            recursive,
            params,
            lossy,
        } => run_batch(&input, to, out_dir, jobs, recursive, params.as_deref(), lossy, cli.quiet),
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "off"
    } else {
        "info"
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).try_init();
}

fn open(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn load_params(path: Option<&Path>, lossy: bool) -> anyhow::Result<EncodeParameters> {
    let mut params = match path {
        Some(path) => {
            let text =
                std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
            EncodeParameters::from_toml_str(&text).with_context(|| format!("invalid parameters in {}", path.display()))?
        }
        None => EncodeParameters::default(),
    };
    params.allow_lossy_conversion |= lossy;
    Ok(params)
}

fn run_identify(input: &Path) -> anyhow::Result<()> {
    let format = imaging::identify(&mut open(input)?).with_context(|| format!("cannot identify {}", input.display()))?;
    println!("{}: {} ({})", input.display(), format, format.mime_type());
    Ok(())
}

fn run_info(input: &Path, json: bool, quiet: bool) -> anyhow::Result<()> {
    let info = imaging::get_image_info(open(input)?, None).with_context(|| format!("cannot read {}", input.display()))?;
    if quiet {
        return Ok(());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(input, &info);
    }
    Ok(())
}

fn print_info(input: &Path, info: &ImageInfo) {
    println!("File: {}", input.display());
    println!("  Format: {} ({})", info.format, info.mime_type());
    println!("  Dimensions: {}x{}", info.width, info.height);
    println!("  Bits/Pixel: {}", info.bits_per_pixel);
    println!("  Color Type: {:?}", info.color_type);
    println!("  Transparency: {}", if info.has_transparency { "Yes" } else { "No" });
    println!("  Compression: {}", info.compression);
    if info.image_count > 1 {
        println!("  Images: {}", info.image_count);
    }
    if let (Some(x), Some(y)) = (info.physical_width_dpi(), info.physical_height_dpi()) {
        println!("  Resolution: {:.1}x{:.1} DPI", x, y);
    }
    if info.is_progressive {
        println!("  Progressive: Yes");
    }
    for comment in &info.comments {
        println!("  Comment: {}", comment);
    }
}

fn run_convert(
    input: &Path,
    output: &Path,
    format: Option<ImageFormat>,
    params: Option<&Path>,
    lossy: bool,
) -> anyhow::Result<()> {
    let target = match format {
        Some(format) => format,
        None => match output.extension().and_then(|e| e.to_str()).and_then(ImageFormat::from_extension) {
            Some(format) => format,
            None => bail!("cannot infer an output format from {}; pass --format", output.display()),
        },
    };
    let params = load_params(params, lossy)?;
    let outcome = batch::convert_file(input, output, target, None, Some(&params))
        .with_context(|| format!("cannot convert {} to {}", input.display(), target))?;
    log::debug!(
        "{}x{}: {} bytes -> {} bytes",
        outcome.width,
        outcome.height,
        outcome.input_bytes,
        outcome.output_bytes
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_batch(
    input: &Path,
    target: ImageFormat,
    out_dir: Option<PathBuf>,
    jobs: Option<usize>,
    recursive: bool,
    params: Option<&Path>,
    lossy: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let params = load_params(params, lossy)?;
    let mut converter = BatchConverter::new(target)
        .params(params)
        .recursive(recursive)
        .max_parallel(jobs.unwrap_or_else(num_cpus::get));
    if let Some(dir) = out_dir {
        converter = converter.output_dir(dir);
    }

    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    bar.set_style(ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")?.progress_chars("#>-"));

    let stats = converter
        .convert_directory_with_progress(input, |result, done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
            bar.set_message(result.job.file_name());
        })
        .with_context(|| format!("batch conversion of {} failed", input.display()))?;
    bar.finish_and_clear();

    if !quiet {
        println!(
            "Converted {} of {} files to {} in {} ms ({} failed)",
            stats.successful, stats.total_files, target, stats.total_time_ms, stats.failed
        );
    }
    if stats.failed > 0 {
        bail!("{} of {} files failed to convert", stats.failed, stats.total_files);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::PixelRaster;
    use tempfile::TempDir;

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("tif"), Ok(ImageFormat::Tiff));
        assert_eq!(parse_format("PNG"), Ok(ImageFormat::Png));
        assert_eq!(parse_format("jpeg"), Ok(ImageFormat::Jpeg));
        assert!(parse_format("webp").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["pixelcodec", "-q", "batch", "scans", "--to", "png", "-j", "2", "-r"]).unwrap();
        assert!(cli.quiet);
        let Commands::Batch { to, jobs, recursive, .. } = cli.command else {
            panic!("expected batch");
        };
        assert_eq!(to, ImageFormat::Png);
        assert_eq!(jobs, Some(2));
        assert!(recursive);
        assert!(Cli::try_parse_from(["pixelcodec", "convert", "a.png"]).is_err());
    }

    #[test]
    fn test_convert_infers_format_from_extension() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.bmp");
        let raster = PixelRaster::from_gray8(5, 4, (0..20).map(|i| i * 12).collect()).unwrap();
        std::fs::write(&input, imaging::encode_to_vec(&raster, ImageFormat::Bmp, None).unwrap()).unwrap();

        let output = dir.path().join("out.pgm");
        run_convert(&input, &output, None, None, false).unwrap();
        let decoded = imaging::read_image(File::open(&output).unwrap(), None).unwrap();
        assert!(decoded.same_pixels(&raster));

        let err = run_convert(&input, &dir.path().join("out.unknown"), None, None, false).unwrap_err();
        assert!(err.to_string().contains("--format"));
    }

    #[test]
    fn test_params_file_and_lossy_flag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.toml");
        std::fs::write(&path, "compression = \"rle\"\nplain_text = true\n").unwrap();
        let params = load_params(Some(&path), true).unwrap();
        assert_eq!(params.compression, Some(crate::config::Compression::Rle));
        assert!(params.plain_text && params.allow_lossy_conversion);

        std::fs::write(&path, "compression_level = 42\n").unwrap();
        assert!(load_params(Some(&path), false).is_err());
    }
}
