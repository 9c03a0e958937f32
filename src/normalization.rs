//! チャンネルごとの min-max 正規化。
//!
//! 学習データ全体を走査してチャンネル別の最小値・最大値を求め、JSON ファイルとして保存します。
//! データセットはこのファイルを読み込み、各チャンネルを `[0, 1]` の範囲に正規化します。

use crate::error::{ParcError, Result};
use ndarray::{Array4, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// チャンネル別の最小値・最大値。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxStats {
    pub channel_min: Vec<f32>,
    pub channel_max: Vec<f32>,
}

impl MinMaxStats {
    /// チャンネル数を返します。
    pub fn num_channels(&self) -> usize {
        self.channel_min.len()
    }

    /// JSON ファイルから統計量を読み込みます。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ParcError::io(path, e))?;
        let stats: Self = serde_json::from_str(&text).map_err(|e| ParcError::json(path, e))?;
        if stats.channel_min.len() != stats.channel_max.len() {
            return Err(ParcError::Shape(format!(
                "'{}' has {} minima but {} maxima",
                path.display(),
                stats.channel_min.len(),
                stats.channel_max.len()
            )));
        }
        Ok(stats)
    }

    /// 統計量を JSON ファイルに書き出します。
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ParcError::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| ParcError::json(path, e))?;
        fs::write(path, text).map_err(|e| ParcError::io(path, e))
    }

    fn range(&self, channel: usize) -> f32 {
        self.channel_max[channel] - self.channel_min[channel]
    }

    /// 1つの値を正規化します。最小値と最大値が等しいチャンネルは 0 になります。
    pub fn normalize_value(&self, value: f32, channel: usize) -> f32 {
        let range = self.range(channel);
        if range == 0.0 {
            0.0
        } else {
            (value - self.channel_min[channel]) / range
        }
    }

    /// 正規化された値を物理量に戻します。
    pub fn denormalize_value(&self, value: f32, channel: usize) -> f32 {
        value * self.range(channel) + self.channel_min[channel]
    }

    /// `(T, C, H, W)` の配列をその場で正規化します。
    pub fn normalize_in_place(&self, data: &mut Array4<f32>) -> Result<()> {
        self.check_channels(data)?;
        for (c, mut lane) in data.axis_iter_mut(Axis(1)).enumerate() {
            lane.mapv_inplace(|v| self.normalize_value(v, c));
        }
        Ok(())
    }

    /// `(T, C, H, W)` の配列をその場で物理量に戻します。
    pub fn denormalize_in_place(&self, data: &mut Array4<f32>) -> Result<()> {
        self.check_channels(data)?;
        for (c, mut lane) in data.axis_iter_mut(Axis(1)).enumerate() {
            lane.mapv_inplace(|v| self.denormalize_value(v, c));
        }
        Ok(())
    }

    fn check_channels(&self, data: &Array4<f32>) -> Result<()> {
        let channels = data.dim().1;
        if channels != self.num_channels() {
            return Err(ParcError::Shape(format!(
                "data has {} channels but statistics cover {}",
                channels,
                self.num_channels()
            )));
        }
        Ok(())
    }
}

/// ディレクトリ内の `.npy` ファイルを名前順に列挙します（再帰はしません）。
pub fn list_npy_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|e| ParcError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ParcError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "npy") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// `(T, C, H, W)` のシミュレーションを読み込みます。f64 で保存されたファイルは f32 に変換します。
pub fn read_simulation(path: impl AsRef<Path>) -> Result<Array4<f32>> {
    let path = path.as_ref();
    match ndarray_npy::read_npy::<_, Array4<f32>>(path) {
        Ok(array) => Ok(array),
        Err(ndarray_npy::ReadNpyError::WrongDescriptor(_)) => {
            let array = ndarray_npy::read_npy::<_, Array4<f64>>(path).map_err(|source| {
                ParcError::Npy {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            Ok(array.mapv(|v| v as f32))
        }
        Err(source) => Err(ParcError::Npy {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// 全データディレクトリを走査してチャンネル別の最小値・最大値を求め、`output_file` に保存します。
pub fn compute_min_max<P: AsRef<Path>>(
    data_dirs: &[P],
    output_file: impl AsRef<Path>,
) -> Result<MinMaxStats> {
    let mut stats: Option<MinMaxStats> = None;
    let mut n_files = 0usize;

    for dir in data_dirs {
        for path in list_npy_files(dir)? {
            let data = read_simulation(&path)?;
            let channels = data.dim().1;
            let acc = stats.get_or_insert_with(|| MinMaxStats {
                channel_min: vec![f32::INFINITY; channels],
                channel_max: vec![f32::NEG_INFINITY; channels],
            });
            if acc.num_channels() != channels {
                return Err(ParcError::Shape(format!(
                    "'{}' has {} channels, expected {}",
                    path.display(),
                    channels,
                    acc.num_channels()
                )));
            }
            for (c, lane) in data.axis_iter(Axis(1)).enumerate() {
                for &v in lane.iter() {
                    if !v.is_finite() {
                        return Err(ParcError::NonFinite {
                            path: path.clone(),
                            channel: c,
                        });
                    }
                    acc.channel_min[c] = acc.channel_min[c].min(v);
                    acc.channel_max[c] = acc.channel_max[c].max(v);
                }
            }
            n_files += 1;
            log::debug!("'{}' を集計しました", path.display());
        }
    }

    let dirs = data_dirs
        .iter()
        .map(|d| d.as_ref().display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let stats = stats.ok_or(ParcError::EmptyDataset(dirs))?;
    stats.save(&output_file)?;
    log::info!(
        "{} 個のファイルから正規化統計量を計算し、'{}' に保存しました",
        n_files,
        output_file.as_ref().display()
    );
    Ok(stats)
}
