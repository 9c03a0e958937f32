//! 物理シミュレーションのデータセット。
//!
//! 各 `.npy` ファイルは `(T, C, H, W)` のシミュレーション1本です。
//! 開始時刻ごとに「初期条件 + 将来 `future_steps` ステップの正解」を1サンプルとして切り出します。

use crate::error::ParcError;
use crate::normalization::{MinMaxStats, list_npy_files, read_simulation};
use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::{Array4, Axis, s};
use std::path::PathBuf;

/// データセットの設定。
#[derive(Config, Debug)]
pub struct PhysicsDatasetConfig {
    /// `.npy` ファイルを含むディレクトリ
    pub data_dirs: Vec<PathBuf>,
    /// 予測する将来ステップ数
    pub future_steps: usize,
    /// 正規化統計量の JSON ファイル
    pub stats_path: PathBuf,
    /// 1ステップあたりの時間刻み
    #[config(default = 1.0)]
    pub dt: f32,
}

/// 1つの学習サンプル。
#[derive(Debug, Clone)]
pub struct PhysicsSample {
    /// 初期条件 `(C, H, W)` を平坦化したもの
    pub ic: Vec<f32>,
    /// 開始時刻
    pub t0: f32,
    /// 予測対象の時刻列
    pub t1: Vec<f32>,
    /// 正解 `(future_steps, C, H, W)` を平坦化したもの
    pub target: Vec<f32>,
    /// `(C, H, W)`
    pub frame_shape: [usize; 3],
}

/// 正規化済みのシミュレーションをメモリ上に保持するデータセット。
#[derive(Debug)]
pub struct PhysicsDataset {
    simulations: Vec<Array4<f32>>,
    files: Vec<PathBuf>,
    /// `(シミュレーション番号, 開始ステップ)`
    index: Vec<(usize, usize)>,
    future_steps: usize,
    dt: f32,
    stats: MinMaxStats,
}

impl PhysicsDataset {
    /// 設定に従って全シミュレーションを読み込み、正規化します。
    pub fn new(config: &PhysicsDatasetConfig) -> crate::Result<Self> {
        if config.future_steps == 0 {
            return Err(ParcError::Shape("future_steps must be at least 1".into()));
        }
        let stats = MinMaxStats::load(&config.stats_path)?;

        let mut simulations = Vec::new();
        let mut files = Vec::new();
        let mut index = Vec::new();
        let mut frame_shape: Option<[usize; 3]> = None;

        for dir in &config.data_dirs {
            for path in list_npy_files(dir)? {
                let mut data = read_simulation(&path)?;
                let (steps, c, h, w) = data.dim();
                if steps <= config.future_steps {
                    log::warn!(
                        "'{}' は {} ステップしかないためスキップします（必要: {}）",
                        path.display(),
                        steps,
                        config.future_steps + 1
                    );
                    continue;
                }
                match frame_shape {
                    None => frame_shape = Some([c, h, w]),
                    Some(shape) if shape != [c, h, w] => {
                        return Err(ParcError::Shape(format!(
                            "'{}' has frame shape {:?}, expected {:?}",
                            path.display(),
                            [c, h, w],
                            shape
                        )));
                    }
                    Some(_) => {}
                }
                stats.normalize_in_place(&mut data)?;

                let sim = simulations.len();
                index.extend((0..steps - config.future_steps).map(|start| (sim, start)));
                simulations.push(data);
                files.push(path);
            }
        }

        if index.is_empty() {
            let dirs = config
                .data_dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ParcError::EmptyDataset(dirs));
        }
        log::info!(
            "{} 本のシミュレーションから {} サンプルを作成しました",
            simulations.len(),
            index.len()
        );

        Ok(Self {
            simulations,
            files,
            index,
            future_steps: config.future_steps,
            dt: config.dt,
            stats,
        })
    }

    /// 正規化に使用した統計量。
    pub fn stats(&self) -> &MinMaxStats {
        &self.stats
    }

    /// サンプル `index` の元ファイルと開始ステップ。
    pub fn source_of(&self, index: usize) -> Option<(&PathBuf, usize)> {
        self.index
            .get(index)
            .map(|&(sim, start)| (&self.files[sim], start))
    }

    pub fn future_steps(&self) -> usize {
        self.future_steps
    }
}

impl Dataset<PhysicsSample> for PhysicsDataset {
    fn get(&self, index: usize) -> Option<PhysicsSample> {
        let &(sim, start) = self.index.get(index)?;
        let data = &self.simulations[sim];
        let (_, c, h, w) = data.dim();

        let ic = data.index_axis(Axis(0), start).iter().copied().collect();
        let target = data
            .slice(s![start + 1..=start + self.future_steps, .., .., ..])
            .iter()
            .copied()
            .collect();
        let t0 = start as f32 * self.dt;
        let t1 = (1..=self.future_steps)
            .map(|k| t0 + k as f32 * self.dt)
            .collect();

        Some(PhysicsSample {
            ic,
            t0,
            t1,
            target,
            frame_shape: [c, h, w],
        })
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

/// バッチ化されたサンプル。正解は時間軸が先頭の `[T, B, C, H, W]` です。
#[derive(Debug, Clone)]
pub struct PhysicsBatch<B: Backend> {
    pub ic: Tensor<B, 4>,
    pub t0: f32,
    pub t1: Vec<f32>,
    pub target: Tensor<B, 5>,
}

/// [`PhysicsSample`] をまとめて [`PhysicsBatch`] を作成します。
///
/// 積分器はバッチ全体で1つの時刻列を共有するため、相対時刻 `t0 = 0` に揃えます。
#[derive(Clone, Debug, Default)]
pub struct PhysicsBatcher;

impl PhysicsBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, PhysicsSample, PhysicsBatch<B>> for PhysicsBatcher {
    fn batch(&self, items: Vec<PhysicsSample>, device: &B::Device) -> PhysicsBatch<B> {
        let first = &items[0];
        let [c, h, w] = first.frame_shape;
        let steps = first.t1.len();
        let t1 = first.t1.iter().map(|t| t - first.t0).collect();

        let ics = items
            .iter()
            .map(|item| {
                Tensor::<B, 3>::from_data(TensorData::new(item.ic.clone(), [c, h, w]), device)
            })
            .collect::<Vec<_>>();
        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 4>::from_data(
                    TensorData::new(item.target.clone(), [steps, c, h, w]),
                    device,
                )
            })
            .collect::<Vec<_>>();

        PhysicsBatch {
            ic: Tensor::stack(ics, 0),
            t0: 0.0,
            t1,
            target: Tensor::stack(targets, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::compute_min_max;
    use crate::normalization::tests::{temp_dir, write_ramp};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn build(name: &str, steps: usize, future_steps: usize) -> PhysicsDataset {
        let dir = temp_dir(name);
        let data_dir = dir.join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        write_ramp(&data_dir.join("sim0.npy"), (steps, 2, 4, 4), 0.0);
        write_ramp(&data_dir.join("short.npy"), (future_steps, 2, 4, 4), 0.0);
        let stats_path = dir.join("stats.json");
        compute_min_max(&[&data_dir], &stats_path).unwrap();
        PhysicsDataset::new(&PhysicsDatasetConfig::new(
            vec![data_dir],
            future_steps,
            stats_path,
        ))
        .unwrap()
    }

    #[test]
    fn builds_one_sample_per_start_step() {
        let dataset = build("dataset-len", 5, 2);
        // 短すぎるファイルはスキップされ、5ステップのファイルから 3 サンプル
        assert_eq!(dataset.len(), 3);
        assert!(dataset.get(3).is_none());

        let sample = dataset.get(1).unwrap();
        assert_eq!(sample.frame_shape, [2, 4, 4]);
        assert_eq!(sample.ic.len(), 2 * 4 * 4);
        assert_eq!(sample.target.len(), 2 * 2 * 4 * 4);
        assert_eq!(sample.t0, 1.0);
        assert_eq!(sample.t1, vec![2.0, 3.0]);
        assert!(sample.ic.iter().all(|v| (0.0..=1.0).contains(v)));
        // 正解の先頭フレームは次のステップの初期条件と一致する
        let next = dataset.get(2).unwrap();
        assert_eq!(&sample.target[..sample.ic.len()], next.ic.as_slice());
    }

    /// `files` の各ファイルを書き出してデータセットを作ります。
    fn build_from(
        name: &str,
        files: &[(&str, (usize, usize, usize, usize))],
        future_steps: usize,
    ) -> crate::Result<PhysicsDataset> {
        let dir = temp_dir(name);
        let data_dir = dir.join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        for (file, shape) in files {
            write_ramp(&data_dir.join(file), *shape, 0.0);
        }
        let stats_path = dir.join("stats.json");
        compute_min_max(&[&data_dir], &stats_path).unwrap();
        PhysicsDataset::new(&PhysicsDatasetConfig::new(
            vec![data_dir],
            future_steps,
            stats_path,
        ))
    }

    #[test]
    fn short_file_is_skipped_before_shape_check() {
        let dataset = build_from(
            "dataset-short-shape",
            &[("a.npy", (4, 2, 4, 4)), ("b_short.npy", (1, 2, 8, 8))],
            2,
        )
        .unwrap();
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn mismatched_frame_shape_is_rejected() {
        let result = build_from(
            "dataset-shape",
            &[("a.npy", (4, 2, 4, 4)), ("b.npy", (4, 2, 8, 8))],
            2,
        );
        assert!(matches!(result, Err(ParcError::Shape(_))));
    }

    #[test]
    fn zero_horizon_is_rejected() {
        let config = PhysicsDatasetConfig::new(vec![], 0, PathBuf::from("missing.json"));
        assert!(matches!(PhysicsDataset::new(&config), Err(ParcError::Shape(_))));
    }

    #[test]
    fn batcher_stacks_time_major_targets() {
        let dataset = build("dataset-batch", 4, 2);
        let items = vec![dataset.get(0).unwrap(), dataset.get(1).unwrap()];
        let device = Default::default();
        let batch: PhysicsBatch<TestBackend> = PhysicsBatcher::new().batch(items, &device);

        assert_eq!(batch.ic.dims(), [2, 2, 4, 4]);
        assert_eq!(batch.target.dims(), [2, 2, 2, 4, 4]);
        assert_eq!(batch.t0, 0.0);
        assert_eq!(batch.t1, vec![1.0, 2.0]);
    }
}
