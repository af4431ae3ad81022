use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use flashattn_core::{AttnShape, DType};
use flashattn_kernels::{
    forward_alloc, max_abs_diff, random_qkv, reference_forward_with_lse, AttentionConfig,
    Backend, ParityReport, Tolerance,
};

const BANNER: &str = r#"
  ___ _         _          _   _
 | __| |__ _ __| |_  __ _| |_| |_ _ _
 | _|| / _` (_-< ' \/ _` |  _|  _| ' \
 |_| |_\__,_/__/_||_\__,_|\__|\__|_||_|"#;

#[derive(Parser)]
#[command(
    name = "flashattn",
    about = "Tiled streaming-softmax attention",
    long_about = "Forward pass of scaled dot-product attention computed tile by tile,\nwith a sequential and a lane-group parallel backend, checked against an\nunblocked reference.",
    version,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show build and runtime info
    Info,
    /// Compare a backend against the reference on random inputs
    Check(CheckArgs),
    /// Time the reference and both backends over several sequence lengths
    Bench {
        /// Sequence lengths to benchmark (comma-separated)
        #[arg(long, default_value = "64,128,256,512")]
        seq_lens: String,
        /// Head dimension
        #[arg(long, default_value = "64")]
        head_dim: usize,
        /// Apply a causal mask
        #[arg(long)]
        causal: bool,
    },
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Batch size
    #[arg(long, default_value = "1")]
    batch: usize,
    /// Number of heads
    #[arg(long, default_value = "1")]
    heads: usize,
    /// Sequence length
    #[arg(short = 'N', long = "seq-len", default_value = "128")]
    seq_len: usize,
    /// Head dimension
    #[arg(short = 'D', long = "head-dim", default_value = "64")]
    head_dim: usize,
    /// Query tile size [default: 64]
    #[arg(long)]
    br: Option<usize>,
    /// Key/value tile size [default: 64]
    #[arg(long)]
    bc: Option<usize>,
    /// Input storage format: f32, f16, bf16 [default: f32]
    #[arg(long)]
    dtype: Option<String>,
    /// Apply a causal mask
    #[arg(long, conflicts_with = "no_causal")]
    causal: bool,
    /// Disable the causal mask, even if the config file enables it
    #[arg(long)]
    no_causal: bool,
    /// sequential or group_parallel [default: sequential]
    #[arg(long)]
    backend: Option<String>,
    /// Lanes per group for the group-parallel backend [default: 32]
    #[arg(long)]
    lanes: Option<usize>,
    /// Dedicated worker threads [default: rayon global pool]
    #[arg(long)]
    threads: Option<usize>,
    /// Seed for the random inputs
    #[arg(long, default_value = "0")]
    seed: u64,
    /// JSON file with an AttentionConfig; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info => {
            cmd_info();
            Ok(())
        }
        Commands::Check(args) => cmd_check(args),
        Commands::Bench { seq_lens, head_dim, causal } => cmd_bench(&seq_lens, head_dim, causal),
    }
}

fn cmd_info() {
    println!("{}", BANNER);
    println!("  v{}  -  tiled streaming-softmax attention\n", env!("CARGO_PKG_VERSION"));

    println!("Platform");
    println!("  OS:      {}", std::env::consts::OS);
    println!("  Arch:    {}", std::env::consts::ARCH);
    println!("  Threads: {} (rayon)", rayon::current_num_threads());

    println!("\nInput dtypes (accumulation is always f32)");
    for dtype in DType::ALL {
        println!(
            "  {:<5} {} bytes/element, tolerance {:.0e}",
            dtype.to_string(),
            dtype.element_size(),
            Tolerance::for_dtype(dtype),
        );
    }

    println!("\nBackends");
    for backend in Backend::ALL {
        println!("  {}", backend);
    }

    let cfg = AttentionConfig::default();
    println!("\nDefaults");
    println!("  Br={} Bc={} lanes={} causal={}", cfg.block_q, cfg.block_k, cfg.lanes, cfg.causal);
}

fn load_config(args: &CheckArgs) -> anyhow::Result<AttentionConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            tracing::info!("loaded config from {}", path.display());
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => AttentionConfig::default(),
    };
    if let Some(br) = args.br {
        cfg.block_q = br;
    }
    if let Some(bc) = args.bc {
        cfg.block_k = bc;
    }
    if let Some(dtype) = &args.dtype {
        cfg.dtype = dtype.parse()?;
    }
    if let Some(backend) = &args.backend {
        cfg.backend = backend.parse()?;
    }
    if let Some(lanes) = args.lanes {
        cfg.lanes = lanes;
    }
    if args.threads.is_some() {
        cfg.num_threads = args.threads;
    }
    if args.causal {
        cfg.causal = true;
    } else if args.no_causal {
        cfg.causal = false;
    }
    cfg.validate()?;
    tracing::debug!("effective config: {:?}", cfg);
    Ok(cfg)
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args)?;
    let shape = AttnShape::new(args.batch, args.heads, args.seq_len, args.head_dim);
    shape.validate()?;

    println!("=== flashattn check ===");
    println!(
        "B={} H={} N={} D={}  Br={} Bc={}  dtype={} causal={} backend={} lanes={}",
        shape.batch, shape.heads, shape.seq_len, shape.head_dim,
        cfg.block_q, cfg.block_k, cfg.dtype, cfg.causal, cfg.backend, cfg.lanes,
    );

    let (q, k, v) = random_qkv(shape, args.seed);

    let start = Instant::now();
    let expected = reference_forward_with_lse(&q, &k, &v, cfg.causal)?;
    let ref_s = start.elapsed().as_secs_f64();

    let (qc, kc, vc) = (q.to_dtype(cfg.dtype), k.to_dtype(cfg.dtype), v.to_dtype(cfg.dtype));
    let start = Instant::now();
    let got = forward_alloc(&qc, &kc, &vc, &cfg)?;
    let run_s = start.elapsed().as_secs_f64();

    let report = ParityReport::new(
        max_abs_diff(&got.o, &expected.o)?,
        max_abs_diff(&got.lse, &expected.lse)?,
        Tolerance::for_dtype(cfg.dtype),
    );

    println!("reference: {:>10.3}ms", ref_s * 1000.0);
    println!("{:<10} {:>10.3}ms", format!("{}:", cfg.backend), run_s * 1000.0);
    println!("{}", report);

    if !report.passed {
        bail!("parity check failed: {}", report);
    }
    Ok(())
}

fn cmd_bench(seq_lens: &str, head_dim: usize, causal: bool) -> anyhow::Result<()> {
    let seq_lens: Vec<usize> = seq_lens
        .split(',')
        .map(|s| s.trim().parse::<usize>().with_context(|| format!("bad sequence length '{s}'")))
        .collect::<anyhow::Result<_>>()?;

    println!("=== flashattn forward benchmark ===");
    println!("D={} causal={} threads={}\n", head_dim, causal, rayon::current_num_threads());
    println!("{:<10} {:>14} {:>16} {:>16} {:>9}",
        "SeqLen", "Reference (ms)", "Sequential (ms)", "Group (ms)", "Max diff");
    println!("{}", "-".repeat(69));

    let seq_cfg = AttentionConfig::default().with_causal(causal);
    let grp_cfg = seq_cfg.clone().with_backend(Backend::GroupParallel);

    for seq_len in seq_lens {
        let shape = AttnShape::new(1, 1, seq_len, head_dim);
        shape.validate()?;
        let (q, k, v) = random_qkv(shape, 0);
        let iters = if seq_len <= 128 { 20 } else if seq_len <= 256 { 5 } else { 2 };

        let mut expected = None;
        let ref_s = time_it(iters, || {
            expected = Some(reference_forward_with_lse(&q, &k, &v, causal));
        });
        let mut seq_out = None;
        let seq_s = time_it(iters, || {
            seq_out = Some(forward_alloc(&q, &k, &v, &seq_cfg));
        });
        let mut grp_out = None;
        let grp_s = time_it(iters, || {
            grp_out = Some(forward_alloc(&q, &k, &v, &grp_cfg));
        });

        let (Some(expected), Some(seq_out), Some(grp_out)) = (expected, seq_out, grp_out) else {
            bail!("benchmark ran zero iterations");
        };
        let (expected, seq_out, grp_out) = (expected?, seq_out?, grp_out?);
        let diff = max_abs_diff(&seq_out.o, &expected.o)?.max(max_abs_diff(&grp_out.o, &expected.o)?);

        println!("{:<10} {:>12.3}ms {:>14.3}ms {:>14.3}ms {:>9.1e}",
            format!("N={}", seq_len),
            ref_s * 1000.0,
            seq_s * 1000.0,
            grp_s * 1000.0,
            diff,
        );
    }
    Ok(())
}

fn time_it(iters: usize, mut f: impl FnMut()) -> f64 {
    let start = Instant::now();
    for _ in 0..iters {
        f();
    }
    start.elapsed().as_secs_f64() / iters as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_args(argv: &[&str]) -> CheckArgs {
        let mut full = vec!["flashattn", "check"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Check(args) => args,
            _ => panic!("expected the check subcommand"),
        }
    }

    fn causal_config_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("flashattn-{}-{name}.json", std::process::id()));
        std::fs::write(&path, r#"{"causal": true, "block_k": 16}"#).unwrap();
        path
    }

    #[test]
    fn test_flags_override_config_file() {
        let path = causal_config_file("override");
        let p = path.to_str().unwrap();

        let cfg = load_config(&check_args(&["--config", p])).unwrap();
        assert!(cfg.causal);
        assert_eq!(cfg.block_k, 16);

        let cfg = load_config(&check_args(&["--config", p, "--no-causal"])).unwrap();
        assert!(!cfg.causal);
        assert_eq!(cfg.block_k, 16);

        let cfg = load_config(&check_args(&["--config", p, "--bc", "8", "--lanes", "4"])).unwrap();
        assert_eq!((cfg.block_k, cfg.lanes), (8, 4));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_causal_flags_conflict() {
        let res = Cli::try_parse_from(["flashattn", "check", "--causal", "--no-causal"]);
        assert!(res.is_err());
        assert!(load_config(&check_args(&["--causal"])).unwrap().causal);
        assert!(!load_config(&check_args(&[])).unwrap().causal);
    }

    #[test]
    fn test_bad_overrides_are_rejected() {
        assert!(load_config(&check_args(&["--lanes", "3"])).is_err());
        assert!(load_config(&check_args(&["--dtype", "fp8"])).is_err());
        assert!(load_config(&check_args(&["--backend", "warp"])).is_err());
    }
}
