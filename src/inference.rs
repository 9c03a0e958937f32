//! 学習済みモデルによる推論と結果の可視化。

use crate::checkpoint::load_weights;
use crate::dataset::{PhysicsBatcher, PhysicsDataset};
use crate::error::{ParcError, Result};
use crate::model::NAVIER_STOKES_CHANNELS;
use crate::training::{CONFIG_FILENAME, FINAL_MODEL_NAME, TrainingConfig};
use crate::visualization::{save_comparison_gif, tensor_to_array};
use burn::backend::NdArray;
use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use ndarray::{Array4, Axis};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

type MyBackend = NdArray<f32>;

/// 推論の入力。
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    /// `train` の出力ディレクトリ（設定と重みを読み込みます）
    pub run_dir: PathBuf,
    /// 学習時とは別のデータで推論する場合のディレクトリ
    pub data_dirs: Option<Vec<PathBuf>>,
    /// 推論するサンプルの番号
    pub index: usize,
    /// 予測するステップ数（省略時は学習時と同じ）
    pub future_steps: Option<usize>,
    /// アニメーションを出力するチャンネル
    pub channels: Vec<usize>,
    pub out_dir: PathBuf,
    pub frame_delay_ms: u32,
}

/// 推論結果の誤差。`mae[step][channel]` は物理単位での平均絶対誤差です。
#[derive(Debug, Clone)]
pub struct InferenceReport {
    pub mae: Vec<Vec<f32>>,
    pub animations: Vec<PathBuf>,
}

fn channel_name(channel: usize, n_channels: usize) -> String {
    if n_channels == NAVIER_STOKES_CHANNELS.len() {
        NAVIER_STOKES_CHANNELS[channel].to_string()
    } else {
        format!("channel_{channel}")
    }
}

/// 各ステップ・各チャンネルの平均絶対誤差。
fn mean_abs_error(prediction: &Array4<f32>, target: &Array4<f32>) -> Vec<Vec<f32>> {
    prediction
        .axis_iter(Axis(0))
        .zip(target.axis_iter(Axis(0)))
        .map(|(pred, truth)| {
            pred.axis_iter(Axis(0))
                .zip(truth.axis_iter(Axis(0)))
                .map(|(p, t)| (&p - &t).mapv(f32::abs).mean().unwrap_or(0.0))
                .collect()
        })
        .collect()
}

/// `infer` サブコマンドを実行します。
pub fn run(options: &InferenceOptions) -> Result<InferenceReport> {
    let device = Default::default();
    log::info!("推論を実行します - バックエンド: NdArray (CPU)");
    let inference_start = Instant::now();

    let config_path = options.run_dir.join(CONFIG_FILENAME);
    let config = TrainingConfig::load(&config_path)
        .map_err(|e| ParcError::Config(format!("'{}': {e}", config_path.display())))?;

    let mut dataset_config = config.dataset.clone();
    if let Some(dirs) = &options.data_dirs {
        dataset_config.data_dirs = dirs.clone();
    }
    if let Some(n) = options.future_steps {
        dataset_config.future_steps = n;
    }
    let dataset = PhysicsDataset::new(&dataset_config)?;
    let sample = dataset.get(options.index).ok_or_else(|| {
        ParcError::Config(format!(
            "sample index {} out of range ({} samples)",
            options.index,
            dataset.len()
        ))
    })?;
    let n_channels = sample.frame_shape[0];
    if let Some(&bad) = options.channels.iter().find(|&&c| c >= n_channels) {
        return Err(ParcError::Config(format!(
            "channel {bad} out of range for {n_channels} channels"
        )));
    }
    if let Some((file, start)) = dataset.source_of(options.index) {
        log::info!("'{}' のステップ {} から予測します", file.display(), start);
    }

    let model = config.model.init::<MyBackend>(&device)?;
    let model = load_weights(model, options.run_dir.join(FINAL_MODEL_NAME), &device)?;

    let batch = Batcher::<MyBackend, _, _>::batch(&PhysicsBatcher::new(), vec![sample], &device);
    let prediction = model.forward(batch.ic, batch.t0, &batch.t1)?;
    let [steps, _, c, h, w] = prediction.dims();
    let mut prediction = tensor_to_array(prediction.reshape([steps, c, h, w]))?;
    let mut target = tensor_to_array(batch.target.reshape([steps, c, h, w]))?;
    log::info!("=> 推論時間: {:.2?}", inference_start.elapsed());

    dataset.stats().denormalize_in_place(&mut prediction)?;
    dataset.stats().denormalize_in_place(&mut target)?;

    let mae = mean_abs_error(&prediction, &target);
    for (step, errors) in mae.iter().enumerate() {
        let line = errors
            .iter()
            .enumerate()
            .map(|(c, e)| format!("{}={:.4e}", channel_name(c, n_channels), e))
            .collect::<Vec<_>>()
            .join(", ");
        log::info!("[Step {}] MAE: {}", step + 1, line);
    }

    fs::create_dir_all(&options.out_dir).map_err(|e| ParcError::io(&options.out_dir, e))?;
    let mut animations = Vec::with_capacity(options.channels.len());
    for &channel in &options.channels {
        let name = channel_name(channel, n_channels);
        let path = options
            .out_dir
            .join(format!("sample{}_{}.gif", options.index, name));
        save_comparison_gif(
            prediction.view(),
            target.view(),
            channel,
            &name,
            &path,
            options.frame_delay_ms,
        )?;
        animations.push(path);
    }

    Ok(InferenceReport { mae, animations })
}
