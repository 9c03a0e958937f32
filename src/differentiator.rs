//! 移流・拡散・反応 (ADR) に基づく微分器。
//!
//! 状態 `[B, C, H, W]` から各チャンネルの時間微分 `∂φ/∂t` を推定します。
//! UNet で抽出した特徴量と、差分法で計算した移流項・拡散項をチャンネルごとの
//! 畳み込みネットワークに入力して時間微分を再構成します。

use crate::error::ParcError;
use crate::finite_difference::{FiniteDifference, PaddingMode};
use crate::unet::{UNet, UNetConfig};
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use std::collections::BTreeSet;

/// ADR 微分器の設定。
#[derive(Config, Debug)]
pub struct AdrDifferentiatorConfig {
    /// 状態のチャンネル数
    pub n_channels: usize,
    /// 移流項を持つチャンネル
    pub advection_indices: Vec<usize>,
    /// 拡散項を持つチャンネル
    pub diffusion_indices: Vec<usize>,
    /// 特徴量だけから時間微分を推定するチャンネル
    #[config(default = "Vec::new()")]
    pub reaction_indices: Vec<usize>,
    /// 速度場 `(u, v)` のチャンネル
    #[config(default = "[2, 3]")]
    pub velocity_indices: [usize; 2],
    /// UNet が出力する特徴量の数
    #[config(default = 64)]
    pub n_fe_features: usize,
    #[config(default = "vec![32, 64, 128]")]
    pub unet_filters: Vec<usize>,
    /// 再構成ネットワークの隠れチャンネル数
    #[config(default = 64)]
    pub mapping_hidden: usize,
    #[config(default = "PaddingMode::Replicate")]
    pub padding: PaddingMode,
}

/// 1チャンネル分の物理項の有無。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTerms {
    pub channel: usize,
    pub advection: bool,
    pub diffusion: bool,
}

impl ChannelTerms {
    fn n_inputs(&self, n_features: usize) -> usize {
        n_features + 1 + usize::from(self.advection) + usize::from(self.diffusion)
    }
}

/// 学習パラメータを持たない構成情報。
#[derive(Debug, Clone)]
pub struct AdrLayout {
    pub n_channels: usize,
    pub velocity: [usize; 2],
    pub dynamic: Vec<ChannelTerms>,
    pub fd: FiniteDifference,
}

impl AdrDifferentiatorConfig {
    /// チャンネル番号の整合性を検査します。
    pub fn validate(&self) -> crate::Result<()> {
        let all = self
            .advection_indices
            .iter()
            .chain(&self.diffusion_indices)
            .chain(&self.reaction_indices)
            .chain(&self.velocity_indices);
        if let Some(bad) = all.into_iter().find(|&&i| i >= self.n_channels) {
            return Err(ParcError::Config(format!(
                "channel index {bad} out of range for {} channels",
                self.n_channels
            )));
        }
        if self.layout().dynamic.is_empty() {
            return Err(ParcError::Config(
                "differentiator needs at least one advection, diffusion or reaction channel".into(),
            ));
        }
        Ok(())
    }

    fn layout(&self) -> AdrLayout {
        let dynamic = self
            .advection_indices
            .iter()
            .chain(&self.diffusion_indices)
            .chain(&self.reaction_indices)
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|channel| ChannelTerms {
                channel,
                advection: self.advection_indices.contains(&channel),
                diffusion: self.diffusion_indices.contains(&channel),
            })
            .collect();
        AdrLayout {
            n_channels: self.n_channels,
            velocity: self.velocity_indices,
            dynamic,
            fd: FiniteDifference::new(self.padding),
        }
    }

    /// 新しい微分器を初期化します。
    pub fn init<B: Backend>(&self, device: &B::Device) -> AdrDifferentiator<B> {
        let layout = self.layout();
        let mappings = layout
            .dynamic
            .iter()
            .map(|terms| {
                let n_inputs = terms.n_inputs(self.n_fe_features);
                MappingAndRecon::new(n_inputs, self.mapping_hidden, device)
            })
            .collect();
        let feature_extractor = UNetConfig::new(self.n_channels, self.n_fe_features)
            .with_filters(self.unet_filters.clone())
            .init(device);

        AdrDifferentiator {
            feature_extractor,
            mappings,
            layout: Ignored(layout),
        }
    }
}

/// 特徴量と物理項から1チャンネルの時間微分を再構成するネットワーク。
#[derive(Module, Debug)]
pub struct MappingAndRecon<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    out: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> MappingAndRecon<B> {
    pub fn new(in_channels: usize, hidden: usize, device: &B::Device) -> Self {
        let conv3 = |c_in| {
            Conv2dConfig::new([c_in, hidden], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };
        Self {
            conv1: conv3(in_channels),
            conv2: conv3(hidden),
            out: Conv2dConfig::new([hidden, 1], [1, 1]).init(device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.conv1.forward(x));
        let x = self.activation.forward(self.conv2.forward(x));
        self.out.forward(x)
    }
}

/// ADR 微分器。
#[derive(Module, Debug)]
pub struct AdrDifferentiator<B: Backend> {
    feature_extractor: UNet<B>,
    mappings: Vec<MappingAndRecon<B>>,
    layout: Ignored<AdrLayout>,
}

/// `[B, C, H, W]` からチャンネル `index` を `[B, 1, H, W]` として取り出します。
pub(crate) fn channel<B: Backend>(state: &Tensor<B, 4>, index: usize) -> Tensor<B, 4> {
    state.clone().narrow(1, index, 1)
}

impl<B: Backend> AdrDifferentiator<B> {
    pub fn layout(&self) -> &AdrLayout {
        &self.layout.0
    }

    /// 入力の形状を検査します。
    pub fn check_input(&self, dims: [usize; 4]) -> crate::Result<()> {
        if dims[1] != self.layout.0.n_channels {
            return Err(ParcError::Shape(format!(
                "state has {} channels, differentiator expects {}",
                dims[1], self.layout.0.n_channels
            )));
        }
        self.feature_extractor.check_input(dims)
    }

    /// 状態 `[B, C, H, W]` の時間微分を返します。動的でないチャンネルの微分は 0 です。
    pub fn forward(&self, state: Tensor<B, 4>) -> Tensor<B, 4> {
        let layout = &self.layout.0;
        let [b, c, h, w] = state.dims();
        let features = self.feature_extractor.forward(state.clone());
        let u = channel(&state, layout.velocity[0]);
        let v = channel(&state, layout.velocity[1]);

        let mut rates: Vec<Option<Tensor<B, 4>>> = vec![None; c];
        for (terms, mapping) in layout.dynamic.iter().zip(&self.mappings) {
            let phi = channel(&state, terms.channel);
            let mut inputs = vec![features.clone(), phi.clone()];
            if terms.advection {
                inputs.push(layout.fd.advection(phi.clone(), u.clone(), v.clone()));
            }
            if terms.diffusion {
                inputs.push(layout.fd.laplacian(phi));
            }
            rates[terms.channel] = Some(mapping.forward(Tensor::cat(inputs, 1)));
        }

        let zeros = Tensor::zeros([b, 1, h, w], &state.device());
        let rates = rates
            .into_iter()
            .map(|rate| rate.unwrap_or_else(|| zeros.clone()))
            .collect();
        Tensor::cat(rates, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    /// 圧力・レイノルズ数・u・v の4チャンネル構成
    fn navier_stokes_config() -> AdrDifferentiatorConfig {
        AdrDifferentiatorConfig::new(4, vec![2, 3], vec![2, 3])
            .with_n_fe_features(4)
            .with_unet_filters(vec![4, 8])
            .with_mapping_hidden(4)
    }

    #[test]
    fn layout_merges_term_indices() {
        let config =
            AdrDifferentiatorConfig::new(4, vec![2, 3], vec![3]).with_reaction_indices(vec![0]);
        let layout = config.layout();
        assert_eq!(
            layout.dynamic,
            vec![
                ChannelTerms {
                    channel: 0,
                    advection: false,
                    diffusion: false,
                },
                ChannelTerms {
                    channel: 2,
                    advection: true,
                    diffusion: false,
                },
                ChannelTerms {
                    channel: 3,
                    advection: true,
                    diffusion: true,
                },
            ]
        );
    }

    #[test]
    fn static_channels_have_zero_rate() {
        let device = Default::default();
        let diff = navier_stokes_config().init::<TestBackend>(&device);
        let state = Tensor::<TestBackend, 4>::random([2, 4, 8, 8], Distribution::Default, &device);
        diff.check_input(state.dims()).unwrap();

        let rate = diff.forward(state);
        assert_eq!(rate.dims(), [2, 4, 8, 8]);
        let static_part = rate.narrow(1, 0, 2).abs().sum().into_scalar();
        assert_eq!(static_part, 0.0);
    }

    #[test]
    fn rejects_out_of_range_channels() {
        let config = AdrDifferentiatorConfig::new(2, vec![2], vec![]);
        assert!(matches!(config.validate(), Err(ParcError::Config(_))));

        let config = AdrDifferentiatorConfig::new(4, vec![], vec![]);
        assert!(matches!(config.validate(), Err(ParcError::Config(_))));

        assert!(navier_stokes_config().validate().is_ok());
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let diff = navier_stokes_config().init::<TestBackend>(&Default::default());
        assert!(diff.check_input([1, 3, 8, 8]).is_err());
        assert!(diff.check_input([1, 4, 7, 8]).is_err());
    }
}
