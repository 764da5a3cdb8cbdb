use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use likeness_app::{list_images, recognize_and_annotate, start_processing, SortOptions};
use likeness_core::{
    FaceAnalyzer, GroupingOptions, Manifest, ReferenceEncoder, SignatureStore, Threshold, UnknownPolicy, WorkerPool,
};
use likeness_onnx::{DetectorModel, OnnxFaceAnalyzer};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "likeness", about = "Find known people in photos and sort photos by who is in them")]
struct Cli {
    /// Directory holding det_500m.onnx / det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Detector variant: fast or accurate
    #[arg(long, global = true)]
    detector: Option<DetectorModel>,
    /// Maximum signature distance for a match
    #[arg(long, global = true)]
    threshold: Option<f32>,
    /// Worker threads (0 = one per core)
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a signature store from labeled reference photos
    Encode {
        /// Root folder with one subfolder of photos per person
        #[arg(long, conflicts_with = "manifest", required_unless_present = "manifest")]
        references: Option<PathBuf>,
        /// TOML manifest listing reference photos per person
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Folder relative manifest paths resolve against (default: the manifest's folder)
        #[arg(long, requires = "manifest")]
        base_dir: Option<PathBuf>,
        /// Where to write the store
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Label every face in the given photos and write annotated copies
    Recognize {
        /// Photos or folders of photos
        #[arg(required = true)]
        photos: Vec<PathBuf>,
        /// Folder for annotated images and label sidecars
        #[arg(short, long)]
        output: PathBuf,
        /// Signature store to match against
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Copy event photos into one folder per guest
    Sort {
        /// TOML manifest naming each guest and their reference photos
        manifest: PathBuf,
        /// Folder with the guests' reference photos
        guest_dir: PathBuf,
        /// Folder with the event photos to sort
        wedding_dir: PathBuf,
        /// Destination folder
        output_dir: PathBuf,
        /// Also copy unmatched photos into an `unknown` folder
        #[arg(long)]
        keep_unknown: bool,
        /// Put photos that could not be analyzed into `unknown` as well
        #[arg(long)]
        include_failed: bool,
    },
    /// Summarize a saved signature store
    Inspect {
        #[arg(long)]
        store: Option<PathBuf>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    if let Some(detector) = cli.detector {
        config.detector = detector;
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    let threshold = Threshold::new(config.threshold)?;

    match cli.command {
        Commands::Encode {
            references,
            manifest,
            base_dir,
            store,
        } => {
            let analyzer = load_analyzer(&config)?;
            let encoder = ReferenceEncoder::new(&analyzer).with_pool(WorkerPool::new(config.workers));
            let report = match (references, manifest) {
                (Some(root), _) => encoder.encode_references(&root)?,
                (None, Some(path)) => {
                    let manifest = Manifest::load(&path, base_dir.as_deref())?;
                    encoder.encode_manifest(&manifest)?
                }
                (None, None) => bail!("pass --references or --manifest"),
            };

            for diagnostic in &report.diagnostics {
                println!("skipped {}: {}", diagnostic.path.display(), diagnostic.kind);
            }
            if report.store.is_empty() {
                bail!("no faces found in {} reference images; store not written", report.images);
            }

            let path = store.unwrap_or(config.store_path);
            report.store.save(&path)?;
            println!(
                "Encoded {} signatures for {} people from {} images into {}",
                report.store.len(),
                report.store.identities().len(),
                report.images,
                path.display()
            );
        }
        Commands::Recognize { photos, output, store } => {
            let store_path = store.unwrap_or(config.store_path.clone());
            let store = SignatureStore::load(&store_path)?;
            let analyzer = load_analyzer(&config)?;
            store.ensure_compatible(analyzer.dimension(), analyzer.model())?;

            let photos = expand_photos(&photos)?;
            let options = SortOptions {
                threshold,
                workers: config.workers,
                ..SortOptions::default()
            };
            let summary = recognize_and_annotate(&analyzer, &store, &photos, &output, &options)?;

            for diagnostic in &summary.diagnostics {
                println!("skipped {}: {}", diagnostic.path.display(), diagnostic.kind);
            }
            for (label, count) in &summary.faces {
                println!("{label}: {count} face(s)");
            }
            println!("Annotated {} photos into {}", summary.annotated.len(), output.display());
        }
        Commands::Sort {
            manifest,
            guest_dir,
            wedding_dir,
            output_dir,
            keep_unknown,
            include_failed,
        } => {
            let grouping = grouping_options(keep_unknown || config.keep_unknown, include_failed)?;
            let analyzer = load_analyzer(&config)?;
            let options = SortOptions {
                threshold,
                grouping,
                workers: config.workers,
                ..SortOptions::default()
            };
            let summary = start_processing(&analyzer, &manifest, &guest_dir, &wedding_dir, &output_dir, &options)?;

            for diagnostic in &summary.diagnostics {
                println!("skipped {}: {}", diagnostic.path.display(), diagnostic.kind);
            }
            for (guest, count) in &summary.per_identity {
                println!("{guest}: {count} photo(s)");
            }
            if grouping.unknown == UnknownPolicy::Collect {
                println!("unknown: {} photo(s)", summary.unknown);
            }
            println!(
                "Sorted {} photos: {} files copied into {}",
                summary.photos,
                summary.files_copied,
                output_dir.display()
            );
        }
        Commands::Inspect { store, json } => {
            let path = store.unwrap_or(config.store_path);
            let store = SignatureStore::load(&path)?;
            let mut per_identity: BTreeMap<&str, usize> = BTreeMap::new();
            for (identity, _) in store.iter() {
                *per_identity.entry(identity.as_str()).or_default() += 1;
            }

            if json {
                let summary = serde_json::json!({
                    "path": path,
                    "signatures": store.len(),
                    "dimension": store.dimension(),
                    "model": store.model(),
                    "identities": per_identity,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Store:      {}", path.display());
                println!("Signatures: {}", store.len());
                println!(
                    "Dimension:  {}",
                    store.dimension().map_or("-".to_string(), |d| d.to_string())
                );
                println!("Model:      {}", store.model().unwrap_or("-"));
                for (identity, count) in &per_identity {
                    println!("  {identity}: {count}");
                }
            }
        }
    }

    Ok(())
}

/// `--include-failed` only makes sense once the unknown bucket is kept,
/// whether by flag or by `LIKENESS_KEEP_UNKNOWN`.
fn grouping_options(keep_unknown: bool, include_failed: bool) -> Result<GroupingOptions> {
    if include_failed && !keep_unknown {
        bail!("--include-failed needs the unknown folder: pass --keep-unknown or set LIKENESS_KEEP_UNKNOWN=1");
    }
    Ok(GroupingOptions {
        unknown: if keep_unknown {
            UnknownPolicy::Collect
        } else {
            UnknownPolicy::Drop
        },
        failed_as_unknown: include_failed,
    })
}

fn load_analyzer(config: &Config) -> Result<OnnxFaceAnalyzer> {
    OnnxFaceAnalyzer::load(&config.model_dir, config.detector).with_context(|| {
        format!(
            "loading {} detector and ArcFace from {}",
            config.detector,
            config.model_dir.display()
        )
    })
}

/// Files are taken as given; folders contribute their image files.
fn expand_photos(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut photos = Vec::new();
    for input in inputs {
        if input.is_dir() {
            photos.extend(list_images(input)?);
        } else if input.is_file() {
            photos.push(input.clone());
        } else {
            bail!("{}: no such file or directory", input.display());
        }
    }
    Ok(photos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::path::Path;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sort_with_global_flags() {
        let cli = Cli::try_parse_from([
            "likeness", "sort", "guests.toml", "guests", "wedding", "out", "--keep-unknown", "--detector", "accurate",
        ])
        .unwrap();
        assert_eq!(cli.detector, Some(DetectorModel::Accurate));
        assert!(matches!(cli.command, Commands::Sort { keep_unknown: true, include_failed: false, .. }));
    }

    #[test]
    fn test_include_failed_checked_against_resolved_policy() {
        // Accepted by the parser without --keep-unknown; the environment may supply it.
        let cli = Cli::try_parse_from(["likeness", "sort", "g.toml", "g", "w", "o", "--include-failed"]).unwrap();
        let Commands::Sort {
            keep_unknown,
            include_failed,
            ..
        } = cli.command
        else {
            panic!("expected sort");
        };
        assert!(!keep_unknown && include_failed);

        let from_env = grouping_options(true, include_failed).unwrap();
        assert_eq!(from_env.unknown, UnknownPolicy::Collect);
        assert!(from_env.failed_as_unknown);
        assert!(grouping_options(false, include_failed).is_err());
        assert_eq!(grouping_options(false, false).unwrap().unknown, UnknownPolicy::Drop);
    }

    #[test]
    fn test_encode_requires_a_source() {
        assert!(Cli::try_parse_from(["likeness", "encode"]).is_err());
        assert!(Cli::try_parse_from(["likeness", "encode", "--references", "r", "--manifest", "m.toml"]).is_err());
        assert!(Cli::try_parse_from(["likeness", "encode", "--manifest", "m.toml"]).is_ok());
    }

    #[test]
    fn test_expand_photos() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        let single = dir.path().join("b.txt");

        let photos = expand_photos(&[dir.path().to_path_buf(), single.clone()]).unwrap();
        assert_eq!(photos, vec![dir.path().join("a.jpg"), single]);
        assert!(expand_photos(&[Path::new("/nonexistent/x.jpg").to_path_buf()]).is_err());
    }
}
