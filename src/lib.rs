//! # PARCv2 ライブラリ
//!
//! `burn` フレームワークを使用して、物理情報付き再帰畳み込みネットワーク（PARCv2）を構築し、
//! 2次元 Navier-Stokes 流れの時間発展を学習するための主要なコンポーネントを提供します。
//!
//! - [`differentiator`]: UNet の特徴量と移流・拡散項から時間微分を推定します
//! - [`integrator`]: 時間微分を ODE ソルバーで積分し、圧力を [`poisson`] ブロックで補正します
//! - [`model`]: 両者をまとめた [`Parcv2`] モデル

pub mod checkpoint;
pub mod cli;
pub mod dataset;
pub mod differentiator;
pub mod error;
pub mod finite_difference;
pub mod inference;
pub mod integrator;
pub mod model;
pub mod normalization;
pub mod poisson;
pub mod training;
pub mod unet;
pub mod visualization;

pub use error::{ParcError, Result};
pub use model::{Parcv2, Parcv2Config};
pub use training::TrainingConfig;
