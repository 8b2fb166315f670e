use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use digit_classifier_lib::ml::{predict_image, train_model};
use digit_classifier_lib::model::AppConfig;

/// 数字画像分類器の学習・推論
#[derive(Parser, Debug)]
#[command(name = "digit_classifier", version, about = "Train and run the 28x28 digit classifier.")]
struct Cli {
    /// 設定ファイル（JSON）。省略時は ./config.json があれば使用
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// マニフェストの画像で学習し、ダンプを更新する
    Train(TrainArgs),

    /// ダンプを読み込んで1枚の画像を分類する
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// ラベルマニフェスト(CSV)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// 画像ディレクトリ
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// ダンプファイル
    #[arg(long)]
    dump: Option<PathBuf>,

    /// エポック数
    #[arg(long)]
    epochs: Option<usize>,
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// 分類する画像
    image: PathBuf,

    /// ダンプファイル
    #[arg(long)]
    dump: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("digit_classifier=info,digit_classifier_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AppConfig::load_or_default(AppConfig::default_path()),
    };

    match cli.command {
        Commands::Train(args) => {
            if let Some(manifest) = args.manifest {
                config.paths.manifest_path = manifest;
            }
            if let Some(image_dir) = args.image_dir {
                config.paths.image_dir = image_dir;
            }
            if let Some(dump) = args.dump {
                config.paths.dump_path = dump;
            }
            if let Some(epochs) = args.epochs {
                config.training.num_epochs = epochs;
            }
            config.display();

            let report = train_model(&config).context("training failed")?;
            tracing::info!(
                "学習完了: {} に保存しました (累積 {} エポック)",
                report.dump_path.display(),
                report.total_epochs
            );
        }
        Commands::Predict(args) => {
            if let Some(dump) = args.dump {
                config.paths.dump_path = dump;
            }
            let prediction = predict_image(&config, &args.image)
                .with_context(|| format!("prediction failed for {}", args.image.display()))?;
            println!("{}", prediction.label);
        }
    }

    Ok(())
}
