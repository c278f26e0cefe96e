//! glimpse: smoke harness for the grid scanner and the selective reader.
//!
//! Builds seeded synthetic inputs, runs both components once and logs the
//! shapes, scores and reader diagnostics.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use glimpse::grid::WindowShape;
use glimpse::params::ParamStore;
use glimpse::reader::jump::DensityJumper;
use glimpse::reader::location::{DOC_EXTENT, DOC_START};
use glimpse::reader::{EmbeddingTable, ReaderConfig, ReaderSettings, SelectiveReader};
use glimpse::{match_and_read, scan_grid, ScanStrategy};

/// glimpse CLI.
#[derive(Parser, Debug)]
#[command(
    name = "glimpse",
    about = "Grid-LSTM scan and selective-jump reader on synthetic data",
    version
)]
struct Cli {
    /// Seed for inputs and parameter initialization.
    #[arg(long, default_value_t = glimpse::config::DEFAULT_SEED)]
    seed: u64,

    /// Batch size for both components.
    #[arg(short, long, default_value_t = 2)]
    batch: usize,

    /// Image height and width for the grid scan.
    #[arg(long, num_args = 2, default_values_t = [8, 10])]
    image: Vec<usize>,

    /// Input channels of the image.
    #[arg(long, default_value_t = 3)]
    channels: usize,

    /// Patch height and width.
    #[arg(long, num_args = 2, default_values_t = [2, 3])]
    window: Vec<usize>,

    /// Hidden units of the grid cell.
    #[arg(long, default_value_t = 16)]
    hidden: usize,

    /// Scan driver: dynamic or unrolled.
    #[arg(long, default_value_t = ScanStrategy::Dynamic)]
    strategy: ScanStrategy,

    /// Scan from the bottom-right corner instead of the top-left.
    #[arg(long, default_value_t = false)]
    reverse: bool,

    /// Document and query lengths for the reader.
    #[arg(long, num_args = 2, default_values_t = [24, 5])]
    lengths: Vec<usize>,

    /// Vocabulary size of the synthetic token ids.
    #[arg(long, default_value_t = 50)]
    vocab: usize,

    /// Embedding width.
    #[arg(long, default_value_t = 8)]
    embedding: usize,

    /// JSON file with reader settings; replaces the reader flags below.
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long, default_value = "dot")]
    interaction: String,

    #[arg(long, default_value = "fix_hard")]
    glimpse: String,

    /// Rows per glimpse in fix_hard mode.
    #[arg(long, default_value_t = 1)]
    glimpse_fix_size: usize,

    #[arg(long, default_value = "max_hard")]
    jump: String,

    #[arg(long)]
    min_density: Option<f32>,

    #[arg(long)]
    max_jump_offset: Option<f32>,

    #[arg(long, default_value = "sum_hard")]
    represent: String,

    #[arg(long)]
    rnn_size: Option<usize>,

    #[arg(long, default_value_t = glimpse::config::DEFAULT_MAX_JUMP_STEP)]
    max_jump_step: usize,
}

impl Cli {
    fn reader_settings(&self) -> Result<ReaderSettings> {
        if let Some(path) = &self.settings {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            return ReaderSettings::from_json(&text)
                .with_context(|| format!("parsing {}", path.display()));
        }
        Ok(ReaderSettings {
            interaction: self.interaction.clone(),
            glimpse: self.glimpse.clone(),
            glimpse_fix_size: Some(self.glimpse_fix_size),
            jump: self.jump.clone(),
            min_density: self.min_density,
            max_jump_offset: self.max_jump_offset,
            represent: self.represent.clone(),
            rnn_size: self.rnn_size,
            max_jump_step: self.max_jump_step,
        })
    }
}

/// Grows the glimpse from its start until the mean absolute match of the
/// covered rows drops below the threshold. Always keeps at least one row.
struct GreedyDensity;

impl DensityJumper for GreedyDensity {
    fn jump(
        &self,
        match_matrix: &ndarray::Array3<f32>,
        _dq_size: &Array2<usize>,
        location: &Array2<f32>,
        min_density: f32,
    ) -> anyhow::Result<Array2<f32>> {
        let rows = match_matrix.dim().1;
        let mut out = location.clone();
        for b in 0..location.nrows() {
            let start = location[[b, DOC_START]].floor().max(0.0) as usize;
            let end = (location[[b, DOC_START]] + location[[b, DOC_EXTENT]]).floor().max(0.0) as usize;
            let end = end.min(rows);
            let mut extent = 1usize;
            let mut total = 0.0f32;
            for (i, row) in (start..end).enumerate() {
                total += match_matrix.slice(ndarray::s![b, row, ..]).mean().unwrap_or(0.0).abs();
                if total / (i + 1) as f32 >= min_density {
                    extent = i + 1;
                } else {
                    break;
                }
            }
            out[[b, DOC_EXTENT]] = extent as f32;
        }
        Ok(out)
    }
}

fn run_grid(cli: &Cli, rng: &mut StdRng, params: &mut ParamStore) -> Result<()> {
    let normal = Normal::new(0.0f32, 1.0).context("building the input distribution")?;
    let (h, w) = (cli.image[0], cli.image[1]);
    let image = Array4::from_shape_simple_fn((cli.batch, h, w, cli.channels), || normal.sample(&mut *rng));
    let window = WindowShape::new(cli.window[0], cli.window[1]);
    let reverse = cli.reverse.then_some([false, true, true, false]);

    let out = scan_grid(cli.hidden, &image, window, reverse, cli.strategy, params, "smoke")
        .context("grid scan failed")?;
    tracing::info!(
        "Grid scan ({}): input {:?} -> output {:?}, {} cells",
        cli.strategy,
        image.shape(),
        out.output.shape(),
        out.grid.0 * out.grid.1,
    );
    let unhealthy = out.states.iter().filter(|s| !s.is_healthy()).count();
    if unhealthy > 0 {
        tracing::warn!("{} cell states contain non-finite values", unhealthy);
    }
    Ok(())
}

fn run_reader(cli: &Cli, rng: &mut StdRng, params: &mut ParamStore) -> Result<()> {
    let config = ReaderConfig::try_from(cli.reader_settings()?).context("invalid reader settings")?;
    let reader = SelectiveReader::with_density_jumper(config, Some(Arc::new(GreedyDensity)))
        .context("building the reader")?;

    let normal = Normal::new(0.0f32, 0.5).context("building the embedding distribution")?;
    let embeddings = EmbeddingTable::new(Array2::from_shape_simple_fn((cli.vocab, cli.embedding), || {
        normal.sample(&mut *rng)
    }));
    let (doc_len, query_len) = (cli.lengths[0], cli.lengths[1]);
    let vocab = cli.vocab.max(1) as u32;
    let doc = Array2::from_shape_simple_fn((cli.batch, doc_len), || rng.gen_range(0..vocab));
    let query = Array2::from_shape_simple_fn((cli.batch, query_len), || rng.gen_range(0..vocab));
    // every other example gets a shorter valid document
    let dq_size = Array2::from_shape_fn((cli.batch, 2), |(b, k)| match k {
        0 if b % 2 == 1 => doc_len / 2,
        0 => doc_len,
        _ => query_len,
    });

    let (score, diag) = match_and_read(&query, &doc, &dq_size, &embeddings, &reader, params)
        .context("selective read failed")?;
    tracing::info!("Reader: {:?}", reader.config());
    for (b, s) in score.iter().enumerate() {
        tracing::info!("  example {}: score {:.4} after {} steps", b, s, diag.step[b]);
    }
    tracing::info!(
        "  complete ratio {:.3}, stop ratio {:.3}",
        diag.complete_ratio,
        diag.stop_ratio,
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    tracing::info!("glimpse v{}", env!("CARGO_PKG_VERSION"));

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let mut params = ParamStore::new(cli.seed);

    run_grid(&cli, &mut rng, &mut params)?;
    run_reader(&cli, &mut rng, &mut params)?;

    tracing::info!(
        "{} parameter tensors, {} values",
        params.len(),
        params.param_count(),
    );
    tracing::info!("Done.");
    Ok(())
}
