use crate::dataset::PhysicsDatasetConfig;
use crate::error::{ParcError, Result};
use crate::inference::InferenceOptions;
use crate::model::Parcv2Config;
use crate::training::TrainingConfig;
use burn::config::Config;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Physics-aware recurrent convolutional network (PARCv2) for Navier-Stokes data, built with Burn", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（normalize, train または infer）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// データのチャンネルごとの最小値・最大値を計算し、JSON に保存します
    Normalize(NormalizeArgs),
    /// PARCv2 モデルを学習し、結果をファイルに保存します
    Train(TrainArgs),
    /// 保存されたモデルで推論し、正解との比較アニメーションを出力します
    Infer(InferArgs),
}

#[derive(Args, Debug)]
pub struct NormalizeArgs {
    /// `.npy` ファイルを含むディレクトリ（複数指定可）
    #[arg(long = "data-dir", required = true)]
    pub data_dirs: Vec<PathBuf>,
    /// 統計量の出力先
    #[arg(long, default_value = "stats.json")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// 学習設定の JSON ファイル。指定した場合も下のオプションで上書きできます
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long = "data-dir")]
    pub data_dirs: Vec<PathBuf>,
    #[arg(long = "validation-dir")]
    pub validation_dirs: Vec<PathBuf>,
    /// `normalize` で作成した統計量
    #[arg(long)]
    pub stats: Option<PathBuf>,
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    #[arg(long)]
    pub future_steps: Option<usize>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub learning_rate: Option<f64>,
    #[arg(long)]
    pub seed: Option<u64>,
}

/// 設定ファイルを使わない場合の既定値
const DEFAULT_FUTURE_STEPS: usize = 1;
const DEFAULT_OUTPUT_DIR: &str = "runs/parc";

impl TrainArgs {
    /// コマンドライン引数から学習設定を組み立てます。
    pub fn to_config(&self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .map_err(|e| ParcError::Config(format!("'{}': {e}", path.display())))?,
            None => {
                if self.data_dirs.is_empty() {
                    return Err(ParcError::Config(
                        "--data-dir is required when --config is not given".into(),
                    ));
                }
                let stats = self.stats.clone().ok_or_else(|| {
                    ParcError::Config("--stats is required when --config is not given".into())
                })?;
                let dataset = PhysicsDatasetConfig::new(
                    self.data_dirs.clone(),
                    DEFAULT_FUTURE_STEPS,
                    stats,
                );
                TrainingConfig::new(
                    Parcv2Config::navier_stokes(),
                    dataset,
                    PathBuf::from(DEFAULT_OUTPUT_DIR),
                )
            }
        };

        if !self.data_dirs.is_empty() {
            config.dataset.data_dirs = self.data_dirs.clone();
        }
        if !self.validation_dirs.is_empty() {
            config.validation_dirs = Some(self.validation_dirs.clone());
        }
        if let Some(stats) = &self.stats {
            config.dataset.stats_path = stats.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(n) = self.future_steps {
            config.dataset.future_steps = n;
        }
        if let Some(n) = self.epochs {
            config.epochs = n;
        }
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(lr) = self.learning_rate {
            config.learning_rate = lr;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct InferArgs {
    /// `train` の出力ディレクトリ
    #[arg(long)]
    pub run_dir: PathBuf,
    /// 推論に使うデータ（省略時は学習データ）
    #[arg(long = "data-dir")]
    pub data_dirs: Vec<PathBuf>,
    #[arg(long, default_value_t = 0)]
    pub index: usize,
    /// 予測するステップ数（省略時は学習時と同じ）
    #[arg(long)]
    pub future_steps: Option<usize>,
    /// アニメーションを出力するチャンネル（カンマ区切り）
    #[arg(long, value_delimiter = ',', default_value = "0,2,3")]
    pub channels: Vec<usize>,
    #[arg(long, default_value = "inference")]
    pub out: PathBuf,
    /// GIF の1フレームの表示時間（ミリ秒）
    #[arg(long, default_value_t = 200)]
    pub frame_delay: u32,
}

impl InferArgs {
    pub fn to_options(&self) -> InferenceOptions {
        InferenceOptions {
            run_dir: self.run_dir.clone(),
            data_dirs: (!self.data_dirs.is_empty()).then(|| self.data_dirs.clone()),
            index: self.index,
            future_steps: self.future_steps,
            channels: self.channels.clone(),
            out_dir: self.out.clone(),
            frame_delay_ms: self.frame_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::tests::temp_dir;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(std::iter::once("parc").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn train_flags_build_navier_stokes_config() {
        let Commands::Train(args) = parse(&[
            "train",
            "--data-dir",
            "a",
            "--data-dir",
            "b",
            "--stats",
            "stats.json",
            "--epochs",
            "3",
            "--future-steps",
            "5",
        ]) else {
            panic!("expected train");
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.dataset.data_dirs, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(config.dataset.future_steps, 5);
        assert_eq!(config.epochs, 3);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(config.model.differentiator.n_channels, 4);
    }

    #[test]
    fn train_without_data_is_rejected() {
        let Commands::Train(args) = parse(&["train", "--stats", "s.json"]) else {
            panic!("expected train");
        };
        assert!(matches!(args.to_config(), Err(ParcError::Config(_))));
    }

    #[test]
    fn flags_override_config_file() {
        let dir = temp_dir("cli-config");
        let path = dir.join("train.json");
        let dataset = PhysicsDatasetConfig::new(vec![dir.join("data")], 2, dir.join("stats.json"));
        TrainingConfig::new(Parcv2Config::navier_stokes(), dataset, dir.join("run"))
            .with_epochs(7)
            .save(&path)
            .unwrap();

        let path_arg = path.to_string_lossy().to_string();
        let Commands::Train(args) =
            parse(&["train", "--config", &path_arg, "--learning-rate", "0.01"])
        else {
            panic!("expected train");
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.epochs, 7);
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.dataset.future_steps, 2);
        assert_eq!(config.output_dir, dir.join("run"));
    }

    #[test]
    fn infer_parses_channel_list() {
        let Commands::Infer(args) = parse(&[
            "infer",
            "--run-dir",
            "run",
            "--channels",
            "2,3",
            "--index",
            "4",
            "--future-steps",
            "10",
        ]) else {
            panic!("expected infer");
        };
        let options = args.to_options();
        assert_eq!(options.channels, vec![2, 3]);
        assert_eq!(options.index, 4);
        assert_eq!(options.future_steps, Some(10));
        assert!(options.data_dirs.is_none());
        assert_eq!(options.out_dir, PathBuf::from("inference"));
    }

    #[test]
    fn normalize_requires_data_dir() {
        assert!(Cli::try_parse_from(["parc", "normalize"]).is_err());
        let Commands::Normalize(args) = parse(&["normalize", "--data-dir", "d"]) else {
            panic!("expected normalize");
        };
        assert_eq!(args.output, PathBuf::from("stats.json"));
    }
}
