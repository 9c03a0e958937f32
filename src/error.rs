use std::path::PathBuf;
use thiserror::Error;

/// クレート全体で使用するエラー型。
#[derive(Debug, Error)]
pub enum ParcError {
    /// ファイル入出力に失敗しました。
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSONの読み書きに失敗しました。
    #[error("JSON error at '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `.npy` ファイルの読み込みに失敗しました。
    #[error("failed to read npy file '{path}': {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    /// モデルの重みの保存・読み込みに失敗しました。
    #[error("recorder error: {0}")]
    Recorder(#[from] burn::record::RecorderError),

    /// 設定ファイルの読み込みに失敗しました。
    #[error("config error: {0}")]
    Config(String),

    /// テンソルや配列の形状が期待と異なります。
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// 時刻列が不正です（空、または単調増加でない）。
    #[error("invalid time sequence: {0}")]
    InvalidTime(String),

    /// データセットにサンプルが存在しません。
    #[error("no samples found in {0}")]
    EmptyDataset(String),

    /// 数値データに NaN や無限大が含まれています。
    #[error("non-finite value in '{path}' (channel {channel})")]
    NonFinite { path: PathBuf, channel: usize },

    /// グラフ・アニメーションの描画に失敗しました。
    #[error("plot error: {0}")]
    Plot(String),

    /// テンソルデータの変換に失敗しました。
    #[error("tensor data error: {0}")]
    Tensor(String),
}

impl ParcError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ParcError>;
