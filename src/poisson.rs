use crate::differentiator::channel;
use crate::error::ParcError;
use crate::finite_difference::{FiniteDifference, PaddingMode};
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// Poisson ブロックの設定。
#[derive(Config, Debug)]
pub struct PoissonBlockConfig {
    /// 置き換える圧力チャンネル
    #[config(default = 0)]
    pub pressure_index: usize,
    #[config(default = "[2, 3]")]
    pub velocity_indices: [usize; 2],
    #[config(default = 32)]
    pub hidden: usize,
    #[config(default = "PaddingMode::Replicate")]
    pub padding: PaddingMode,
}

#[derive(Debug, Clone)]
pub struct PoissonLayout {
    pub pressure: usize,
    pub velocity: [usize; 2],
    pub fd: FiniteDifference,
}

/// 速度場から圧力場を推定するブロック。
///
/// 非圧縮流れの圧力ポアソン方程式の右辺
/// `-(u_x² + 2 u_y v_x + v_y²)` を速度場とともに畳み込みネットワークに入力し、
/// 積分の各ステップ後に圧力チャンネルを置き換えます。
#[derive(Module, Debug)]
pub struct PoissonBlock<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    out: Conv2d<B>,
    activation: Relu,
    layout: Ignored<PoissonLayout>,
}

impl PoissonBlockConfig {
    pub fn validate(&self, n_channels: usize) -> crate::Result<()> {
        let indices = [self.pressure_index, self.velocity_indices[0], self.velocity_indices[1]];
        if indices.iter().any(|&i| i >= n_channels) {
            return Err(ParcError::Config(format!(
                "poisson indices {indices:?} out of range for {n_channels} channels"
            )));
        }
        if self.velocity_indices.contains(&self.pressure_index) {
            return Err(ParcError::Config(
                "pressure channel cannot also be a velocity channel".into(),
            ));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> PoissonBlock<B> {
        let conv3 = |c_in| {
            Conv2dConfig::new([c_in, self.hidden], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };
        PoissonBlock {
            conv1: conv3(3),
            conv2: conv3(self.hidden),
            out: Conv2dConfig::new([self.hidden, 1], [1, 1]).init(device),
            activation: Relu::new(),
            layout: Ignored(PoissonLayout {
                pressure: self.pressure_index,
                velocity: self.velocity_indices,
                fd: FiniteDifference::new(self.padding),
            }),
        }
    }
}

/// 圧力ポアソン方程式の右辺 `-(u_x² + 2 u_y v_x + v_y²)`。
pub fn pressure_source<B: Backend>(
    fd: &FiniteDifference,
    u: Tensor<B, 4>,
    v: Tensor<B, 4>,
) -> Tensor<B, 4> {
    let (ux, uy) = fd.gradient(u);
    let (vx, vy) = fd.gradient(v);
    (ux.powf_scalar(2.0) + uy.mul(vx).mul_scalar(2.0) + vy.powf_scalar(2.0)).neg()
}

/// チャンネル `index` を `replacement` に置き換えた状態を返します。
pub(crate) fn replace_channel<B: Backend>(
    state: Tensor<B, 4>,
    index: usize,
    replacement: Tensor<B, 4>,
) -> Tensor<B, 4> {
    let channels = state.dims()[1];
    let parts = (0..channels)
        .map(|i| {
            if i == index {
                replacement.clone()
            } else {
                channel(&state, i)
            }
        })
        .collect();
    Tensor::cat(parts, 1)
}

impl<B: Backend> PoissonBlock<B> {
    /// 状態 `[B, C, H, W]` から圧力 `[B, 1, H, W]` を推定します。
    pub fn forward(&self, state: Tensor<B, 4>) -> Tensor<B, 4> {
        let layout = &self.layout.0;
        let u = channel(&state, layout.velocity[0]);
        let v = channel(&state, layout.velocity[1]);
        let source = pressure_source(&layout.fd, u.clone(), v.clone());
        let x = Tensor::cat(vec![u, v, source], 1);
        let x = self.activation.forward(self.conv1.forward(x));
        let x = self.activation.forward(self.conv2.forward(x));
        self.out.forward(x)
    }

    /// 圧力チャンネルを推定値で置き換えます。
    pub fn apply(&self, state: Tensor<B, 4>) -> Tensor<B, 4> {
        let pressure = self.forward(state.clone());
        replace_channel(state, self.layout.0.pressure, pressure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    #[test]
    fn source_of_uniform_shear() {
        let device = Default::default();
        let fd = FiniteDifference::new(PaddingMode::Replicate);
        // u = y, v = x: u_y = v_x = 1 の内部点で右辺は -2
        let h = 4;
        let u: Vec<f32> = (0..h * h).map(|k| (k / h) as f32).collect();
        let v: Vec<f32> = (0..h * h).map(|k| (k % h) as f32).collect();
        let u = Tensor::<TestBackend, 4>::from_data(TensorData::new(u, [1, 1, h, h]), &device);
        let v = Tensor::<TestBackend, 4>::from_data(TensorData::new(v, [1, 1, h, h]), &device);

        let source = pressure_source(&fd, u, v).into_data().to_vec::<f32>().unwrap();
        assert_relative_eq!(source[h + 1], -2.0);
        assert_relative_eq!(source[2 * h + 2], -2.0);
    }

    #[test]
    fn apply_only_touches_pressure() {
        let device = Default::default();
        let block = PoissonBlockConfig::new().with_hidden(4).init::<TestBackend>(&device);
        let state = Tensor::<TestBackend, 4>::random([2, 4, 6, 6], Distribution::Default, &device);

        let updated = block.apply(state.clone());
        assert_eq!(updated.dims(), [2, 4, 6, 6]);
        let unchanged = (updated.narrow(1, 1, 3) - state.narrow(1, 1, 3))
            .abs()
            .max()
            .into_scalar();
        assert_eq!(unchanged, 0.0);
    }

    #[test]
    fn validates_indices() {
        assert!(PoissonBlockConfig::new().validate(4).is_ok());
        assert!(PoissonBlockConfig::new().validate(3).is_err());
        assert!(
            PoissonBlockConfig::new()
                .with_pressure_index(2)
                .validate(4)
                .is_err()
        );
    }
}
