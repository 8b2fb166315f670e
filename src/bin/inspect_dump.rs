//! ダンプファイルのメタデータを表示する確認用バイナリ

use digit_classifier_lib::model::{print_metadata_info, AppConfig, ModelStore};
use std::path::PathBuf;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Digit Classifier Dump Inspector ===\n");

    // 引数がなければ設定のダンプパスを使う
    let args: Vec<String> = std::env::args().collect();
    let dump_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        AppConfig::load_or_default(AppConfig::default_path()).paths.dump_path
    };

    let store = ModelStore::new(&dump_path);
    match store.load_metadata() {
        Ok(metadata) => {
            println!("✓ メタデータ読み込み成功: {}", dump_path.display());
            print_metadata_info(&metadata);
        }
        Err(e) => {
            eprintln!("✗ エラー: {}", e);
            std::process::exit(1);
        }
    }
}
