//! # PARCv2 物理情報付き再帰畳み込みネットワーク
//!
//! `burn` フレームワークを使用して、Navier-Stokes 方程式のシミュレーションデータから
//! 流れ場の時間発展を学習・予測するプログラムです。
//!
//! `clap` クレートを利用して、コマンドラインから `normalize`（正規化統計量の計算）、
//! `train`（学習）、`infer`（推論）の機能を個別に実行できます。
//!
//! ## 使い方
//!
//! ### 正規化統計量の計算
//! ```bash
//! cargo run --release -- normalize --data-dir data/train --output stats.json
//! ```
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train --data-dir data/train --stats stats.json --epochs 100
//! ```
//!
//! ### 推論
//! ```bash
//! cargo run --release -- infer --run-dir runs/parc --data-dir data/test --index 0 --channels 0,2,3
//! ```

use burn::backend::{Autodiff, NdArray};
use clap::Parser;
use env_logger::Env;
use parc::cli::{Cli, Commands};
use parc::normalization::compute_min_max;
use parc::{inference, training};

type MyAutodiffBackend = Autodiff<NdArray<f32>>;

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Normalize(args) => {
            compute_min_max(args.data_dirs.as_slice(), &args.output)?;
        }
        Commands::Train(args) => {
            let config = args.to_config()?;
            log::info!("学習を実行します - バックエンド: Autodiff<NdArray> (CPU)");
            training::train::<MyAutodiffBackend>(&config, &Default::default())?;
        }
        Commands::Infer(args) => {
            inference::run(&args.to_options())?;
        }
    }
    Ok(())
}

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、各サブコマンドの処理に振り分けます。
fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("エラー: {e}");
        std::process::exit(1);
    }
}
