use crate::error::ParcError;
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, PaddingConfig2d, Relu};
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// UNet の設定。
#[derive(Config, Debug)]
pub struct UNetConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// 各解像度レベルのフィルタ数（浅い順）
    #[config(default = "vec![32, 64, 128]")]
    pub filters: Vec<usize>,
    #[config(default = 0.0)]
    pub dropout: f64,
}

/// 3x3 畳み込み + ReLU を2回行うブロック。
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> DoubleConv<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = |c_in| {
            Conv2dConfig::new([c_in, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };
        Self {
            conv1: conv(in_channels),
            conv2: conv(out_channels),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.conv1.forward(x));
        self.activation.forward(self.conv2.forward(x))
    }
}

/// 特徴抽出用の UNet。
///
/// 入力 `[B, in_channels, H, W]` を同じ解像度の `[B, out_channels, H, W]` の特徴マップに変換します。
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    encoders: Vec<DoubleConv<B>>,
    pool: MaxPool2d,
    ups: Vec<ConvTranspose2d<B>>,
    decoders: Vec<DoubleConv<B>>,
    head: Conv2d<B>,
    dropout: Dropout,
}

impl UNetConfig {
    /// 新しい UNet を初期化します。
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        let mut encoders = Vec::with_capacity(self.filters.len());
        let mut c_in = self.in_channels;
        for &f in &self.filters {
            encoders.push(DoubleConv::new(c_in, f, device));
            c_in = f;
        }

        let mut ups = Vec::new();
        let mut decoders = Vec::new();
        for pair in self.filters.windows(2).rev() {
            let (skip, deep) = (pair[0], pair[1]);
            ups.push(
                ConvTranspose2dConfig::new([deep, skip], [2, 2])
                    .with_stride([2, 2])
                    .init(device),
            );
            decoders.push(DoubleConv::new(2 * skip, skip, device));
        }

        let last = self.filters.first().copied().unwrap_or(self.in_channels);
        UNet {
            encoders,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            ups,
            decoders,
            head: Conv2dConfig::new([last, self.out_channels], [1, 1]).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

impl<B: Backend> UNet<B> {
    /// ダウンサンプリングの回数。
    pub fn depth(&self) -> usize {
        self.encoders.len().saturating_sub(1)
    }

    /// 入力の空間サイズが `2^depth` で割り切れるか検査します。
    pub fn check_input(&self, dims: [usize; 4]) -> crate::Result<()> {
        let factor = 1usize << self.depth();
        let [_, _, h, w] = dims;
        if h % factor != 0 || w % factor != 0 {
            return Err(ParcError::Shape(format!(
                "UNet input {h}x{w} must be divisible by {factor}"
            )));
        }
        Ok(())
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = x;
        for (level, encoder) in self.encoders.iter().enumerate() {
            if level > 0 {
                x = self.pool.forward(x);
            }
            x = encoder.forward(x);
            skips.push(x.clone());
        }
        // 最深レベルの出力は x そのもの
        skips.pop();

        let levels = self.ups.iter().zip(&self.decoders);
        for ((up, decoder), skip) in levels.zip(skips.into_iter().rev()) {
            x = up.forward(x);
            x = decoder.forward(Tensor::cat(vec![skip, x], 1));
        }
        self.head.forward(self.dropout.forward(x))
    }
}
