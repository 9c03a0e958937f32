//! モデルの学習ループと学習結果の保存。

use crate::checkpoint::save_weights;
use crate::dataset::{
    PhysicsBatch, PhysicsBatcher, PhysicsDataset, PhysicsDatasetConfig, PhysicsSample,
};
use crate::error::ParcError;
use crate::model::{Parcv2, Parcv2Config};
use crate::visualization::plot_loss_history;
use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// 設定ファイル名
pub const CONFIG_FILENAME: &str = "config.json";
/// 損失履歴のファイル名
pub const LOSS_HISTORY_FILENAME: &str = "loss_history.json";
/// 損失グラフのファイル名
pub const LOSS_GRAPH_FILENAME: &str = "loss_graph.png";
/// 最終モデルのファイル名（拡張子なし）
pub const FINAL_MODEL_NAME: &str = "model_final";

/// 学習の設定。
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: Parcv2Config,
    pub dataset: PhysicsDatasetConfig,
    /// 検証用データのディレクトリ（省略可）
    #[config(default = "None")]
    pub validation_dirs: Option<Vec<PathBuf>>,
    pub output_dir: PathBuf,
    #[config(default = 100)]
    pub epochs: usize,
    #[config(default = 8)]
    pub batch_size: usize,
    #[config(default = 1e-5)]
    pub learning_rate: f64,
    #[config(default = 42)]
    pub seed: u64,
    /// 勾配ノルムの上限（省略時はクリッピングなし）
    #[config(default = "None")]
    pub grad_clip_norm: Option<f32>,
    /// 何エポックごとにチェックポイントを保存するか（0 で最終モデルのみ）
    #[config(default = 10)]
    pub save_every: usize,
}

/// エポックごとの平均損失。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    pub train: Vec<f32>,
    pub validation: Vec<f32>,
}

impl LossHistory {
    pub fn save(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(|e| ParcError::json(path, e))?;
        fs::write(path, text).map_err(|e| ParcError::io(path, e))
    }

    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ParcError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| ParcError::json(path, e))
    }
}

/// インデックス列を `batch_size` ずつ区切ってバッチを作ります。
fn batches<B: AutodiffBackend>(
    dataset: &PhysicsDataset,
    indices: &[usize],
    batch_size: usize,
    device: &B::Device,
) -> impl Iterator<Item = PhysicsBatch<B>> {
    let batcher = PhysicsBatcher::new();
    indices.chunks(batch_size).map(move |chunk| {
        let items: Vec<PhysicsSample> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
        Batcher::<B, _, _>::batch(&batcher, items, device)
    })
}

/// 勾配を計算せずにデータセット全体の平均損失を求めます。
fn evaluate<B: AutodiffBackend>(
    model: &Parcv2<B>,
    dataset: &PhysicsDataset,
    batch_size: usize,
    device: &B::Device,
) -> crate::Result<f32> {
    let model = model.valid();
    let batcher = PhysicsBatcher::new();
    let indices = (0..dataset.len()).collect::<Vec<_>>();
    let mut total = 0.0;
    let mut count = 0usize;
    for chunk in indices.chunks(batch_size) {
        let items = chunk.iter().filter_map(|&i| dataset.get(i)).collect::<Vec<_>>();
        let batch = Batcher::<B::InnerBackend, _, _>::batch(&batcher, items, device);
        let (_, loss) = model.forward_batch(&batch)?;
        total += loss.into_scalar().elem::<f32>() * chunk.len() as f32;
        count += chunk.len();
    }
    Ok(total / count.max(1) as f32)
}

/// モデルを学習し、チェックポイント・損失履歴・損失グラフを `output_dir` に保存します。
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
) -> crate::Result<Parcv2<B>> {
    if config.batch_size == 0 {
        return Err(ParcError::Config("batch_size must be at least 1".into()));
    }
    let output_dir = &config.output_dir;
    fs::create_dir_all(output_dir).map_err(|e| ParcError::io(output_dir, e))?;
    config
        .save(output_dir.join(CONFIG_FILENAME))
        .map_err(|e| ParcError::io(output_dir.join(CONFIG_FILENAME), e))?;

    // --- データセットの準備 ---
    let train_set = PhysicsDataset::new(&config.dataset)?;
    let valid_set = match &config.validation_dirs {
        Some(dirs) => {
            let mut valid_config = config.dataset.clone();
            valid_config.data_dirs = dirs.clone();
            Some(PhysicsDataset::new(&valid_config)?)
        }
        None => None,
    };

    // --- モデルとオプティマイザの初期化 ---
    B::seed(config.seed);
    let mut model = config.model.init::<B>(device)?;
    let mut optim = AdamConfig::new()
        .with_grad_clipping(config.grad_clip_norm.map(GradientClippingConfig::Norm))
        .init::<B, Parcv2<B>>();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut history = LossHistory::default();
    let training_start = Instant::now();

    log::info!(
        "学習を開始します - サンプル数: {}, エポック数: {}, バッチサイズ: {}",
        train_set.len(),
        config.epochs,
        config.batch_size
    );

    // --- 学習ループ ---
    let mut indices = (0..train_set.len()).collect::<Vec<_>>();
    for epoch in 1..=config.epochs {
        indices.shuffle(&mut rng);
        let mut epoch_loss = 0.0;
        let mut n_seen = 0usize;

        for batch in batches::<B>(&train_set, &indices, config.batch_size, device) {
            let n = batch.ic.dims()[0];
            let (_, loss) = model.forward_batch(&batch)?;
            epoch_loss += loss.clone().into_scalar().elem::<f32>() * n as f32;
            n_seen += n;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        let train_loss = epoch_loss / n_seen.max(1) as f32;
        history.train.push(train_loss);
        match &valid_set {
            Some(valid_set) => {
                let valid_loss = evaluate(&model, valid_set, config.batch_size, device)?;
                history.validation.push(valid_loss);
                log::info!(
                    "[Epoch {}] Train Loss: {:.6}, Validation Loss: {:.6}",
                    epoch,
                    train_loss,
                    valid_loss
                );
            }
            None => log::info!("[Epoch {}] Train Loss: {:.6}", epoch, train_loss),
        }

        if config.save_every > 0 && epoch % config.save_every == 0 {
            save_weights(&model, output_dir.join(format!("model_epoch_{epoch}")))?;
        }
    }
    log::info!("学習が完了しました。学習時間: {:.2?}", training_start.elapsed());

    // --- 結果の保存と描画 ---
    save_weights(&model, output_dir.join(FINAL_MODEL_NAME))?;
    history.save(output_dir.join(LOSS_HISTORY_FILENAME))?;
    let validation = (!history.validation.is_empty()).then_some(history.validation.as_slice());
    let graph_path = output_dir.join(LOSS_GRAPH_FILENAME);
    plot_loss_history(&history.train, validation, &graph_path)?;
    log::info!("損失グラフを '{}' に保存しました", graph_path.display());

    Ok(model)
}
